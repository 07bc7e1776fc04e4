//! The value store: immutable, shareable timestamped samples.
//!
//! A sample carries one of {nothing, bool, f64, text}. The *external*
//! data type of a stream (trigger, boolean, numeric, string, json) is
//! carried by whoever holds the sample, never by the sample itself; a
//! json sample and a string sample are structurally identical.

pub mod json;
pub mod pool;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::StringTierConfig;
use crate::error::Result;
use pool::{QuotaLease, StringTiers};

/// Timestamp sentinel: resolved to the current wall clock at creation.
pub const NOW: f64 = 0.0;

/// Seconds since the Unix epoch, the hub's native timestamp.
pub fn wallclock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// External data type of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// No payload; only the timestamp carries information.
    Trigger,
    Boolean,
    Numeric,
    String,
    /// Text payload holding a JSON document.
    Json,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Trigger => "trigger",
            DataType::Boolean => "boolean",
            DataType::Numeric => "numeric",
            DataType::String => "string",
            DataType::Json => "json",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "trigger" => Some(DataType::Trigger),
            "boolean" => Some(DataType::Boolean),
            "numeric" => Some(DataType::Numeric),
            "string" => Some(DataType::String),
            "json" => Some(DataType::Json),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Numeric(f64),
    Text(String),
}

pub type SampleRef = Rc<Sample>;

/// A timestamped value, shared by reference count. Immutable after
/// construction except for the timestamp.
#[derive(Debug)]
pub struct Sample {
    timestamp: Cell<f64>,
    value: Value,
    _lease: Option<QuotaLease>,
}

impl Sample {
    fn build(timestamp: f64, value: Value, lease: Option<QuotaLease>) -> SampleRef {
        let timestamp = if timestamp == NOW { wallclock() } else { timestamp };
        Rc::new(Self {
            timestamp: Cell::new(timestamp),
            value,
            _lease: lease,
        })
    }

    pub fn trigger(timestamp: f64) -> SampleRef {
        Self::build(timestamp, Value::None, None)
    }

    pub fn boolean(timestamp: f64, value: bool) -> SampleRef {
        Self::build(timestamp, Value::Bool(value), None)
    }

    pub fn numeric(timestamp: f64, value: f64) -> SampleRef {
        Self::build(timestamp, Value::Numeric(value), None)
    }

    pub fn string(timestamp: f64, value: impl Into<String>) -> SampleRef {
        Self::build(timestamp, Value::Text(value.into()), None)
    }

    pub fn json(timestamp: f64, value: impl Into<String>) -> SampleRef {
        Self::build(timestamp, Value::Text(value.into()), None)
    }

    /// New sample with the given payload and timestamp.
    pub(crate) fn from_value(timestamp: f64, value: Value, lease: Option<QuotaLease>) -> SampleRef {
        Self::build(timestamp, value, lease)
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp.get()
    }

    pub fn set_timestamp(&self, timestamp: f64) {
        let timestamp = if timestamp == NOW { wallclock() } else { timestamp };
        self.timestamp.set(timestamp);
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            Value::Numeric(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// String storage pools for text-bearing samples. One per hub.
#[derive(Debug)]
pub struct SamplePools {
    strings: StringTiers,
}

impl SamplePools {
    pub fn new(cfg: &StringTierConfig) -> Self {
        Self {
            strings: StringTiers::new(cfg),
        }
    }

    /// A string sample whose storage is charged against the tiers.
    pub fn string_sample(&self, timestamp: f64, value: impl Into<String>) -> Result<SampleRef> {
        let value = value.into();
        let lease = self.strings.checkout(value.len())?;
        Ok(Sample::from_value(timestamp, Value::Text(value), Some(lease)))
    }

    /// A json sample whose storage is charged against the tiers.
    pub fn json_sample(&self, timestamp: f64, value: impl Into<String>) -> Result<SampleRef> {
        self.string_sample(timestamp, value)
    }

    pub fn strings_in_use(&self) -> usize {
        self.strings.in_use()
    }
}
