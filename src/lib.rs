//! flux-hub: the hierarchy and dispatch core of a data hub.
//!
//! A hub is a tree of named, path-addressed entries through which
//! timestamped sensor and control data flow. Applications publish
//! inputs, consume outputs and install observations that filter,
//! throttle, buffer and statistically summarize routed streams; admin
//! tooling layers defaults, overrides and routing on top.
//!
//! Everything here is single-threaded cooperative: one [`Hub`] per
//! actor, no locking, callbacks run synchronously.

pub mod config;
pub mod error;
pub mod hub;
pub mod resource;
pub mod sample;
pub mod tree;
pub mod watch;

mod facade;

pub use config::{HubConfig, StringTierConfig};
pub use error::{Error, Result};
pub use hub::{Hub, OBSERVATION_NAMESPACE};
pub use resource::observation::{Transform, RELATIVE_TIME_HORIZON};
pub use sample::json::{extract, parse_json, render_json, render_json_bounded};
pub use sample::{DataType, Sample, SamplePools, SampleRef, Value, NOW};
pub use tree::{Entry, EntryKind, EntryRef, Flags};
pub use watch::{ChangeEvent, ChangeOp, WatchHandle};
