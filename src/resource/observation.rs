//! Observation-side state: filters, ring buffer, statistics and the
//! buffer dump.

use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::sample::json::{render_json, render_number};
use crate::sample::{wallclock, DataType, SampleRef};

/// Statistical reduction applied over the buffered window before a
/// value is delivered downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    None,
    Mean,
    Min,
    Max,
    StdDev,
}

impl Transform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transform::None => "none",
            Transform::Mean => "mean",
            Transform::Min => "min",
            Transform::Max => "max",
            Transform::StdDev => "stddev",
        }
    }
}

/// Window-start values at or below this many seconds are ages relative
/// to now; anything larger is an absolute epoch timestamp.
pub const RELATIVE_TIME_HORIZON: f64 = 30.0 * 365.0 * 24.0 * 3600.0;

/// Filter, buffer and delivery settings of one observation. Unset
/// numeric settings are NaN; unset strings are empty.
pub(crate) struct ObsState {
    pub min_period: f64,
    pub high_limit: f64,
    pub low_limit: f64,
    pub change_by: f64,
    pub transform: Transform,
    pub json_extraction: String,
    pub destination: String,
    pub buffer_max: u32,
    pub backup_period: f64,
    buffer: VecDeque<(DataType, SampleRef)>,
    last_accepted: f64,
    last_numeric: Option<f64>,
}

impl Default for ObsState {
    fn default() -> Self {
        Self {
            min_period: f64::NAN,
            high_limit: f64::NAN,
            low_limit: f64::NAN,
            change_by: f64::NAN,
            transform: Transform::None,
            json_extraction: String::new(),
            destination: String::new(),
            buffer_max: 0,
            backup_period: f64::NAN,
            buffer: VecDeque::new(),
            last_accepted: f64::NAN,
            last_numeric: None,
        }
    }
}

impl ObsState {
    /// True iff at least one admin setting is configured.
    pub fn has_settings(&self) -> bool {
        self.min_period.is_finite()
            || self.high_limit.is_finite()
            || self.low_limit.is_finite()
            || self.change_by.is_finite()
            || self.transform != Transform::None
            || !self.json_extraction.is_empty()
            || !self.destination.is_empty()
            || self.buffer_max > 0
            || self.backup_period.is_finite()
    }

    /// Filter verdict for an arriving sample.
    pub fn admit(&self, data_type: DataType, sample: &SampleRef) -> bool {
        if self.min_period.is_finite()
            && self.last_accepted.is_finite()
            && sample.timestamp() - self.last_accepted < self.min_period
        {
            return false;
        }
        if data_type == DataType::Numeric {
            let Some(v) = sample.as_f64() else {
                return false;
            };
            if self.high_limit.is_finite() && v > self.high_limit {
                return false;
            }
            if self.low_limit.is_finite() && v < self.low_limit {
                return false;
            }
            if self.change_by.is_finite() && self.change_by > 0.0 {
                if let Some(prev) = self.last_numeric {
                    if (v - prev).abs() < self.change_by {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Note an accepted sample: advance filter state and buffer it. A
    /// change of data type drops the buffered window.
    pub fn record(&mut self, data_type: DataType, sample: &SampleRef) {
        self.last_accepted = sample.timestamp();
        if data_type == DataType::Numeric {
            self.last_numeric = sample.as_f64();
        }
        if self.buffer_max == 0 {
            return;
        }
        if let Some((buffered_type, _)) = self.buffer.back() {
            if *buffered_type != data_type {
                debug!(
                    from = buffered_type.as_str(),
                    to = data_type.as_str(),
                    "data type changed, dropping buffered samples"
                );
                self.buffer.clear();
            }
        }
        self.buffer.push_back((data_type, Rc::clone(sample)));
        while self.buffer.len() as u32 > self.buffer_max {
            self.buffer.pop_front();
        }
    }

    pub fn set_buffer_max(&mut self, max: u32) {
        self.buffer_max = max;
        while self.buffer.len() as u32 > max {
            self.buffer.pop_front();
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    fn numeric_window(&self, cutoff: f64) -> impl Iterator<Item = f64> + '_ {
        self.buffer
            .iter()
            .filter(move |(_, s)| cutoff.is_nan() || s.timestamp() > cutoff)
            .filter_map(|(dt, s)| match dt {
                DataType::Numeric => s.as_f64(),
                _ => None,
            })
    }

    /// Smallest buffered numeric value newer than `since` (resolved per
    /// the relative/absolute heuristic); NaN when the window is empty.
    pub fn query_min(&self, since: f64) -> f64 {
        self.numeric_window(resolve_window_start(since))
            .fold(f64::NAN, f64::min)
    }

    pub fn query_max(&self, since: f64) -> f64 {
        self.numeric_window(resolve_window_start(since))
            .fold(f64::NAN, f64::max)
    }

    pub fn query_mean(&self, since: f64) -> f64 {
        let (mut sum, mut n) = (0.0, 0usize);
        for v in self.numeric_window(resolve_window_start(since)) {
            sum += v;
            n += 1;
        }
        if n == 0 {
            f64::NAN
        } else {
            sum / n as f64
        }
    }

    /// Population standard deviation over the window.
    pub fn query_stddev(&self, since: f64) -> f64 {
        let mean = self.query_mean(since);
        if mean.is_nan() {
            return f64::NAN;
        }
        let cutoff = resolve_window_start(since);
        let (mut sum, mut n) = (0.0, 0usize);
        for v in self.numeric_window(cutoff) {
            sum += (v - mean) * (v - mean);
            n += 1;
        }
        (sum / n as f64).sqrt()
    }

    /// Value delivered downstream after the configured reduction, or
    /// `None` when the raw sample goes through as-is.
    pub fn transformed_value(&self) -> Option<f64> {
        if self.transform == Transform::None || self.buffer.is_empty() {
            return None;
        }
        Some(match self.transform {
            Transform::None => unreachable!(),
            Transform::Mean => self.query_mean(f64::NAN),
            Transform::Min => self.query_min(f64::NAN),
            Transform::Max => self.query_max(f64::NAN),
            Transform::StdDev => self.query_stddev(f64::NAN),
        })
    }

    /// First buffered sample strictly after `start_after`, resolved per
    /// the relative/absolute heuristic.
    pub fn find_sample_after(&self, start_after: f64) -> Option<SampleRef> {
        let cutoff = resolve_window_start(start_after);
        self.buffer
            .iter()
            .map(|(_, s)| s)
            .find(|s| cutoff.is_nan() || s.timestamp() > cutoff)
            .cloned()
    }

    /// Write the buffered window as a JSON array of `{"t":..,"v":..}`
    /// objects; triggers carry only `"t"`.
    pub fn write_buffer_json(&self, out: &mut dyn Write, start_after: f64) -> Result<()> {
        let cutoff = resolve_window_start(start_after);
        emit(out, "[")?;
        let mut first = true;
        for (dt, sample) in &self.buffer {
            if !(cutoff.is_nan() || sample.timestamp() > cutoff) {
                continue;
            }
            if !first {
                emit(out, ",")?;
            }
            first = false;
            let t = render_number(sample.timestamp());
            match dt {
                DataType::Trigger => emit(out, &format!("{{\"t\":{t}}}"))?,
                _ => emit(
                    out,
                    &format!("{{\"t\":{t},\"v\":{}}}", render_json(sample, *dt)),
                )?,
            }
        }
        emit(out, "]")
    }
}

/// NaN means "from the oldest retained sample".
fn resolve_window_start(start_after: f64) -> f64 {
    if start_after.is_nan() {
        f64::NAN
    } else if start_after <= RELATIVE_TIME_HORIZON {
        wallclock() - start_after
    } else {
        start_after
    }
}

fn emit(out: &mut dyn Write, text: &str) -> Result<()> {
    out.write_all(text.as_bytes())
        .map_err(|e| Error::Fault(e.to_string()))
}
