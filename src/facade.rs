//! Admin façade over per-resource settings.
//!
//! Every accessor checks the entry kind before touching the resource.
//! Wrong-kind setters fail with `BadParameter`; wrong-kind getters log
//! the programmer error and fall back to a neutral value (NaN, `0`,
//! empty, `false`) instead of crashing.

use std::io::Write;

use tracing::error;

use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::resource::observation::{ObsState, Transform};
use crate::resource::Resource;
use crate::sample::{DataType, SampleRef};
use crate::tree::entry::EntryRef;

impl Hub {
    fn obs_write<R>(
        &self,
        entry: &EntryRef,
        op: &'static str,
        f: impl FnOnce(&mut ObsState) -> R,
    ) -> Result<R> {
        match entry.with_resource_mut(|r| r.observation_mut().map(f)) {
            Some(Some(result)) => Ok(result),
            _ => {
                error!(name = entry.name(), op, "observation setting on a non-observation entry");
                Err(Error::BadParameter(format!(
                    "{} is not an observation",
                    entry.name()
                )))
            }
        }
    }

    fn obs_query<R>(
        &self,
        entry: &EntryRef,
        op: &'static str,
        f: impl FnOnce(&ObsState) -> R,
    ) -> Result<R> {
        match entry.with_resource(|r| r.observation().map(f)) {
            Some(Some(result)) => Ok(result),
            _ => {
                error!(name = entry.name(), op, "observation query on a non-observation entry");
                Err(Error::BadParameter(format!(
                    "{} is not an observation",
                    entry.name()
                )))
            }
        }
    }

    fn obs_read<R>(
        &self,
        entry: &EntryRef,
        op: &'static str,
        f: impl FnOnce(&ObsState) -> R,
    ) -> Option<R> {
        let got = entry.with_resource(|r| r.observation().map(f)).flatten();
        if got.is_none() {
            error!(name = entry.name(), op, "observation read on a non-observation entry");
        }
        got
    }

    fn resource_write<R>(
        &self,
        entry: &EntryRef,
        op: &'static str,
        f: impl FnOnce(&mut Resource) -> R,
    ) -> Result<R> {
        entry.with_resource_mut(f).ok_or_else(|| {
            error!(name = entry.name(), op, "admin setting on a namespace entry");
            Error::BadParameter(format!("{} carries no resource", entry.name()))
        })
    }

    // ========================================================================
    // Observation filter settings
    // ========================================================================

    /// Minimum seconds between accepted samples; NaN clears the filter.
    pub fn set_min_period(&self, entry: &EntryRef, seconds: f64) -> Result<()> {
        self.obs_write(entry, "set_min_period", |o| o.min_period = seconds)
    }

    pub fn min_period(&self, entry: &EntryRef) -> f64 {
        self.obs_read(entry, "min_period", |o| o.min_period)
            .unwrap_or(f64::NAN)
    }

    /// Numeric samples above this are filtered out; NaN clears.
    pub fn set_high_limit(&self, entry: &EntryRef, limit: f64) -> Result<()> {
        self.obs_write(entry, "set_high_limit", |o| o.high_limit = limit)
    }

    pub fn high_limit(&self, entry: &EntryRef) -> f64 {
        self.obs_read(entry, "high_limit", |o| o.high_limit)
            .unwrap_or(f64::NAN)
    }

    /// Numeric samples below this are filtered out; NaN clears.
    pub fn set_low_limit(&self, entry: &EntryRef, limit: f64) -> Result<()> {
        self.obs_write(entry, "set_low_limit", |o| o.low_limit = limit)
    }

    pub fn low_limit(&self, entry: &EntryRef) -> f64 {
        self.obs_read(entry, "low_limit", |o| o.low_limit)
            .unwrap_or(f64::NAN)
    }

    /// Numeric samples closer than this to the last accepted value are
    /// filtered out; NaN or zero clears.
    pub fn set_change_by(&self, entry: &EntryRef, change_by: f64) -> Result<()> {
        self.obs_write(entry, "set_change_by", |o| o.change_by = change_by)
    }

    pub fn change_by(&self, entry: &EntryRef) -> f64 {
        self.obs_read(entry, "change_by", |o| o.change_by)
            .unwrap_or(f64::NAN)
    }

    pub fn set_transform(&self, entry: &EntryRef, transform: Transform) -> Result<()> {
        self.obs_write(entry, "set_transform", |o| o.transform = transform)
    }

    pub fn transform(&self, entry: &EntryRef) -> Transform {
        self.obs_read(entry, "transform", |o| o.transform)
            .unwrap_or_default()
    }

    pub fn set_buffer_max_count(&self, entry: &EntryRef, count: u32) -> Result<()> {
        self.obs_write(entry, "set_buffer_max_count", |o| o.set_buffer_max(count))
    }

    pub fn buffer_max_count(&self, entry: &EntryRef) -> u32 {
        self.obs_read(entry, "buffer_max_count", |o| o.buffer_max)
            .unwrap_or(0)
    }

    /// Seconds between buffer backups; NaN disables them.
    pub fn set_buffer_backup_period(&self, entry: &EntryRef, seconds: f64) -> Result<()> {
        self.obs_write(entry, "set_buffer_backup_period", |o| o.backup_period = seconds)
    }

    pub fn buffer_backup_period(&self, entry: &EntryRef) -> f64 {
        self.obs_read(entry, "buffer_backup_period", |o| o.backup_period)
            .unwrap_or(f64::NAN)
    }

    /// Member path applied to arriving JSON samples; empty clears.
    pub fn set_json_extraction(&self, entry: &EntryRef, spec: &str) -> Result<()> {
        let spec = spec.to_string();
        self.obs_write(entry, "set_json_extraction", move |o| o.json_extraction = spec)
    }

    pub fn json_extraction(&self, entry: &EntryRef) -> String {
        self.obs_read(entry, "json_extraction", |o| o.json_extraction.clone())
            .unwrap_or_default()
    }

    /// Path the observation's output is advertised at; empty clears.
    pub fn set_destination(&self, entry: &EntryRef, destination: &str) -> Result<()> {
        let destination = destination.to_string();
        self.obs_write(entry, "set_destination", move |o| o.destination = destination)
    }

    pub fn destination(&self, entry: &EntryRef) -> String {
        self.obs_read(entry, "destination", |o| o.destination.clone())
            .unwrap_or_default()
    }

    // ========================================================================
    // Buffer queries
    // ========================================================================

    /// Smallest buffered numeric value newer than `since`; NaN means
    /// the whole window.
    pub fn query_min(&self, entry: &EntryRef, since: f64) -> Result<f64> {
        self.obs_query(entry, "query_min", |o| o.query_min(since))
    }

    pub fn query_max(&self, entry: &EntryRef, since: f64) -> Result<f64> {
        self.obs_query(entry, "query_max", |o| o.query_max(since))
    }

    pub fn query_mean(&self, entry: &EntryRef, since: f64) -> Result<f64> {
        self.obs_query(entry, "query_mean", |o| o.query_mean(since))
    }

    pub fn query_stddev(&self, entry: &EntryRef, since: f64) -> Result<f64> {
        self.obs_query(entry, "query_stddev", |o| o.query_stddev(since))
    }

    pub fn find_buffered_sample_after(
        &self,
        entry: &EntryRef,
        start_after: f64,
    ) -> Result<Option<SampleRef>> {
        self.obs_query(entry, "find_buffered_sample_after", |o| {
            o.find_sample_after(start_after)
        })
    }

    /// Write the buffered window as a JSON array. `start_after` values
    /// within thirty years are ages relative to now, larger ones are
    /// absolute epoch seconds, NaN starts from the oldest retained
    /// sample.
    pub fn read_buffer_json(
        &self,
        entry: &EntryRef,
        out: &mut dyn Write,
        start_after: f64,
    ) -> Result<()> {
        self.obs_query(entry, "read_buffer_json", |o| {
            o.write_buffer_json(out, start_after)
        })?
    }

    // ========================================================================
    // Defaults, overrides, examples (any resource entry)
    // ========================================================================

    pub fn set_default(
        &self,
        entry: &EntryRef,
        data_type: DataType,
        sample: SampleRef,
    ) -> Result<()> {
        self.resource_write(entry, "set_default", |r| r.set_default(data_type, sample))?
    }

    pub fn default_value(&self, entry: &EntryRef) -> Option<(DataType, SampleRef)> {
        entry.with_resource(|r| r.default_value()).flatten()
    }

    pub fn has_default(&self, entry: &EntryRef) -> bool {
        self.default_value(entry).is_some()
    }

    pub fn remove_default(&self, entry: &EntryRef) -> Result<()> {
        self.resource_write(entry, "remove_default", |r| r.remove_default())
    }

    pub fn set_override(
        &self,
        entry: &EntryRef,
        data_type: DataType,
        sample: SampleRef,
    ) -> Result<()> {
        self.resource_write(entry, "set_override", |r| r.set_override(data_type, sample))?
    }

    pub fn override_value(&self, entry: &EntryRef) -> Option<(DataType, SampleRef)> {
        entry.with_resource(|r| r.override_value()).flatten()
    }

    pub fn has_override(&self, entry: &EntryRef) -> bool {
        self.override_value(entry).is_some()
    }

    pub fn remove_override(&self, entry: &EntryRef) -> Result<()> {
        self.resource_write(entry, "remove_override", |r| r.remove_override())
    }

    pub fn set_json_example(&self, entry: &EntryRef, sample: SampleRef) -> Result<()> {
        self.resource_write(entry, "set_json_example", |r| r.set_json_example(sample))
    }

    pub fn json_example(&self, entry: &EntryRef) -> Option<SampleRef> {
        entry.with_resource(|r| r.json_example()).flatten()
    }

    pub fn json_example_changed(&self, entry: &EntryRef) -> bool {
        entry
            .with_resource(|r| r.json_example_changed())
            .unwrap_or(false)
    }

    pub fn clear_json_example_changed(&self, entry: &EntryRef) -> Result<()> {
        self.resource_write(entry, "clear_json_example_changed", |r| {
            r.clear_json_example_changed()
        })
    }
}
