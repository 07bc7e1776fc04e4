//! The resource tree: nodes, path grammar and traversal primitives.

pub mod entry;
pub mod path;


pub use entry::{Entry, EntryKind, EntryRef, Flags};
