//! Typed state behind every non-namespace entry: current value,
//! defaults and overrides, routing links, push acceptance.

pub mod observation;

use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sample::{json, DataType, Sample, SamplePools, SampleRef};
use crate::tree::entry::{Entry, EntryKind, EntryRef, Flags};
use observation::ObsState;

/// Callback invoked with every sample a resource accepts.
pub type PushHandler = Rc<dyn Fn(DataType, &SampleRef)>;

/// Flavor of the backing state. Io resources and observations carry
/// different admin-setting schemas, so the flavor is fixed when the
/// placeholder is built, before the concrete kind is known.
pub(crate) enum Body {
    Io,
    Obs(Box<ObsState>),
}

/// Resource state owned by an entry.
pub struct Resource {
    kind: EntryKind,
    units: String,
    data_type: DataType,
    current: Option<(DataType, SampleRef)>,
    source: Option<Weak<Entry>>,
    dests: Vec<Weak<Entry>>,
    default_value: Option<(DataType, SampleRef)>,
    override_value: Option<(DataType, SampleRef)>,
    json_example: Option<SampleRef>,
    example_changed: bool,
    flags: Flags,
    pending: Option<(DataType, SampleRef)>,
    handlers: Vec<PushHandler>,
    body: Body,
}

impl Resource {
    fn placeholder(flags: Flags, body: Body) -> Resource {
        Resource {
            kind: EntryKind::Placeholder,
            units: String::new(),
            data_type: DataType::Trigger,
            current: None,
            source: None,
            dests: Vec::new(),
            default_value: None,
            override_value: None,
            json_example: None,
            example_changed: false,
            flags,
            pending: None,
            handlers: Vec::new(),
            body,
        }
    }

    pub(crate) fn io_placeholder(flags: Flags) -> Resource {
        Self::placeholder(flags, Body::Io)
    }

    pub(crate) fn obs_placeholder(flags: Flags) -> Resource {
        Self::placeholder(flags, Body::Obs(Box::default()))
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn current(&self) -> Option<(DataType, SampleRef)> {
        self.current.clone()
    }

    pub(crate) fn observation(&self) -> Option<&ObsState> {
        match &self.body {
            Body::Obs(obs) => Some(obs),
            Body::Io => None,
        }
    }

    pub(crate) fn observation_mut(&mut self) -> Option<&mut ObsState> {
        match &mut self.body {
            Body::Obs(obs) => Some(obs),
            Body::Io => None,
        }
    }

    // ========================================================================
    // Kind transitions
    // ========================================================================

    /// Placeholder -> Input/Output: fix the type and units. A configured
    /// default of the right type becomes the first current value. An
    /// observation-flavored placeholder sheds its observation state here;
    /// io resources carry none of those settings.
    pub(crate) fn convert_to_typed(&mut self, kind: EntryKind, data_type: DataType, units: &str) {
        debug_assert!(matches!(kind, EntryKind::Input | EntryKind::Output));
        self.kind = kind;
        self.data_type = data_type;
        self.units = units.to_string();
        if matches!(self.body, Body::Obs(_)) {
            self.body = Body::Io;
        }
        if self.current.is_none() {
            if let Some((dt, sample)) = &self.default_value {
                if *dt == data_type {
                    self.current = Some((*dt, Rc::clone(sample)));
                }
            }
        }
    }

    /// Placeholder -> Observation. An io-flavored placeholder grows
    /// observation state here.
    pub(crate) fn convert_to_observation(&mut self) {
        self.kind = EntryKind::Observation;
        if matches!(self.body, Body::Io) {
            self.body = Body::Obs(Box::default());
        }
    }

    /// Input/Output -> Placeholder, keeping admin settings.
    pub(crate) fn demote_to_placeholder(&mut self) {
        self.kind = EntryKind::Placeholder;
        self.units.clear();
        self.current = None;
        self.pending = None;
        self.handlers.clear();
    }

    /// True iff at least one admin setting exists on this resource.
    pub(crate) fn has_admin_settings(&self) -> bool {
        if self.default_value.is_some()
            || self.override_value.is_some()
            || self.json_example.is_some()
            || self.source.as_ref().is_some_and(|w| w.strong_count() > 0)
        {
            return true;
        }
        match &self.body {
            Body::Io => false,
            Body::Obs(obs) => obs.has_settings(),
        }
    }

    // ========================================================================
    // Admin values
    // ========================================================================

    fn check_admin_type(&self, data_type: DataType) -> Result<()> {
        if self.kind == EntryKind::Placeholder || data_type == self.data_type {
            Ok(())
        } else {
            Err(Error::BadParameter(format!(
                "type {} does not match resource type {}",
                data_type.as_str(),
                self.data_type.as_str()
            )))
        }
    }

    pub(crate) fn set_default(&mut self, data_type: DataType, sample: SampleRef) -> Result<()> {
        self.check_admin_type(data_type)?;
        self.default_value = Some((data_type, sample));
        Ok(())
    }

    pub(crate) fn default_value(&self) -> Option<(DataType, SampleRef)> {
        self.default_value.clone()
    }

    pub(crate) fn remove_default(&mut self) {
        self.default_value = None;
    }

    pub(crate) fn set_override(&mut self, data_type: DataType, sample: SampleRef) -> Result<()> {
        self.check_admin_type(data_type)?;
        self.override_value = Some((data_type, sample));
        Ok(())
    }

    pub(crate) fn override_value(&self) -> Option<(DataType, SampleRef)> {
        self.override_value.clone()
    }

    pub(crate) fn remove_override(&mut self) {
        self.override_value = None;
    }

    pub(crate) fn set_json_example(&mut self, sample: SampleRef) {
        let changed = self
            .json_example
            .as_ref()
            .map(|old| old.value() != sample.value())
            .unwrap_or(true);
        self.json_example = Some(sample);
        if changed {
            self.example_changed = true;
        }
    }

    pub(crate) fn json_example(&self) -> Option<SampleRef> {
        self.json_example.clone()
    }

    pub(crate) fn json_example_changed(&self) -> bool {
        self.example_changed
    }

    pub(crate) fn clear_json_example_changed(&mut self) {
        self.example_changed = false;
    }

    // ========================================================================
    // Routing links
    // ========================================================================

    pub(crate) fn source_entry(&self) -> Option<EntryRef> {
        self.source.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_source_link(&mut self, src: Option<&EntryRef>) {
        self.source = src.map(Rc::downgrade);
    }

    pub(crate) fn add_dest(&mut self, dest: &EntryRef) {
        self.dests.push(Rc::downgrade(dest));
    }

    pub(crate) fn remove_dest(&mut self, dest: &EntryRef) {
        self.dests.retain(|w| match w.upgrade() {
            Some(e) => !Rc::ptr_eq(&e, dest),
            None => false,
        });
    }

    pub(crate) fn dest_entries(&self) -> Vec<EntryRef> {
        self.dests.iter().filter_map(Weak::upgrade).collect()
    }

    // ========================================================================
    // Snapshot bits, handlers, coalescing
    // ========================================================================

    pub(crate) fn flags(&self) -> Flags {
        self.flags
    }

    pub(crate) fn update_flags(&mut self, f: impl FnOnce(&mut Flags)) {
        f(&mut self.flags)
    }

    pub(crate) fn add_handler(&mut self, handler: PushHandler) {
        self.handlers.push(handler);
    }

    pub(crate) fn handlers(&self) -> Vec<PushHandler> {
        self.handlers.clone()
    }

    pub(crate) fn stash_pending(&mut self, data_type: DataType, sample: SampleRef) {
        self.pending = Some((data_type, sample));
    }

    pub(crate) fn take_pending(&mut self) -> Option<(DataType, SampleRef)> {
        self.pending.take()
    }

    // ========================================================================
    // Push acceptance
    // ========================================================================

    /// Run an arriving sample through override substitution and, for
    /// observations, extraction and filtering. Returns what this
    /// resource now carries and should fan out, or `None` when the
    /// sample was filtered away or soaked up by a placeholder.
    pub(crate) fn accept(
        &mut self,
        data_type: DataType,
        sample: SampleRef,
        pools: &SamplePools,
    ) -> Result<Option<(DataType, SampleRef)>> {
        let mut dt = data_type;
        let mut sample = sample;

        match self.kind {
            EntryKind::Input | EntryKind::Output => {
                if dt != self.data_type {
                    return Err(Error::BadParameter(format!(
                        "pushed {} into a {} resource",
                        dt.as_str(),
                        self.data_type.as_str()
                    )));
                }
            }
            // Observations adopt the type of whatever reaches them.
            EntryKind::Observation => {}
            EntryKind::Placeholder => {
                debug!("push into a placeholder dropped");
                return Ok(None);
            }
            EntryKind::Namespace => unreachable!("namespace entries carry no resource"),
        }

        if let Some((override_type, override_sample)) = &self.override_value {
            if *override_type == dt && dt != DataType::Trigger {
                sample = Sample::from_value(sample.timestamp(), override_sample.value().clone(), None);
            }
        }

        // Only observations filter, extract and buffer.
        if let (EntryKind::Observation, Body::Obs(obs)) = (self.kind, &mut self.body) {
            if !obs.json_extraction.is_empty() && dt == DataType::Json {
                match json::extract(&sample, &obs.json_extraction, pools) {
                    Ok((extracted, extracted_type)) => {
                        sample = extracted;
                        dt = extracted_type;
                    }
                    Err(e) => {
                        warn!(spec = obs.json_extraction.as_str(), error = %e, "extraction failed, sample dropped");
                        return Ok(None);
                    }
                }
            }
            if !obs.admit(dt, &sample) {
                return Ok(None);
            }
            obs.record(dt, &sample);
            if let Some(value) = obs.transformed_value() {
                sample = Sample::numeric(sample.timestamp(), value);
                dt = DataType::Numeric;
            }
        }

        if self.kind == EntryKind::Observation {
            self.data_type = dt;
        }
        self.current = Some((dt, Rc::clone(&sample)));
        Ok(Some((dt, sample)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StringTierConfig;

    fn pools() -> SamplePools {
        SamplePools::new(&StringTierConfig::default())
    }

    fn input(data_type: DataType) -> Resource {
        let mut res = Resource::io_placeholder(Flags::NEW);
        res.convert_to_typed(EntryKind::Input, data_type, "unit");
        res
    }

    #[test]
    fn test_typed_push_guards_type() {
        let mut res = input(DataType::Numeric);
        let err = res
            .accept(DataType::Boolean, Sample::boolean(1.0, true), &pools())
            .unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));

        let out = res
            .accept(DataType::Numeric, Sample::numeric(1.0, 5.0), &pools())
            .unwrap()
            .unwrap();
        assert_eq!(out.0, DataType::Numeric);
        assert_eq!(res.current().unwrap().1.as_f64(), Some(5.0));
    }

    #[test]
    fn test_override_substitutes_value_not_timestamp() {
        let mut res = input(DataType::Numeric);
        res.set_override(DataType::Numeric, Sample::numeric(1.0, 99.0)).unwrap();
        let (_, out) = res
            .accept(DataType::Numeric, Sample::numeric(42.0, 5.0), &pools())
            .unwrap()
            .unwrap();
        assert_eq!(out.as_f64(), Some(99.0));
        assert_eq!(out.timestamp(), 42.0);
    }

    #[test]
    fn test_default_becomes_current_on_typing() {
        let mut res = Resource::io_placeholder(Flags::NEW);
        res.set_default(DataType::Numeric, Sample::numeric(1.0, 7.0)).unwrap();
        res.convert_to_typed(EntryKind::Input, DataType::Numeric, "V");
        assert_eq!(res.current().unwrap().1.as_f64(), Some(7.0));
    }

    #[test]
    fn test_admin_type_checked_once_typed() {
        let mut res = input(DataType::Numeric);
        assert!(res.set_default(DataType::Boolean, Sample::boolean(1.0, true)).is_err());
        assert!(res.set_default(DataType::Numeric, Sample::numeric(1.0, 0.0)).is_ok());
    }

    #[test]
    fn test_placeholder_soaks_up_pushes() {
        let mut res = Resource::io_placeholder(Flags::NEW);
        let out = res
            .accept(DataType::Numeric, Sample::numeric(1.0, 5.0), &pools())
            .unwrap();
        assert!(out.is_none());
        assert!(res.current().is_none());
    }

    #[test]
    fn test_demotion_keeps_admin_settings() {
        let mut res = input(DataType::Numeric);
        res.set_override(DataType::Numeric, Sample::numeric(1.0, 9.0)).unwrap();
        res.accept(DataType::Numeric, Sample::numeric(1.0, 1.0), &pools())
            .unwrap();
        res.demote_to_placeholder();
        assert_eq!(res.kind(), EntryKind::Placeholder);
        assert!(res.current().is_none());
        assert!(res.has_admin_settings());
        assert!(res.override_value().is_some());
    }

    #[test]
    fn test_typing_sheds_observation_flavor() {
        let mut res = Resource::obs_placeholder(Flags::NEW);
        res.observation_mut().unwrap().high_limit = 50.0;
        res.convert_to_typed(EntryKind::Input, DataType::Numeric, "V");
        assert!(res.observation().is_none());

        // No observation filtering on the typed input: a value past the
        // staged limit goes straight through.
        let (_, out) = res
            .accept(DataType::Numeric, Sample::numeric(1.0, 120.0), &pools())
            .unwrap()
            .unwrap();
        assert_eq!(out.as_f64(), Some(120.0));
    }

    #[test]
    fn test_observation_adopts_incoming_type() {
        let mut res = Resource::obs_placeholder(Flags::NEW);
        res.convert_to_observation();
        res.accept(DataType::Boolean, Sample::boolean(1.0, true), &pools())
            .unwrap();
        assert_eq!(res.data_type(), DataType::Boolean);
    }

    #[test]
    fn test_observation_extraction_delivers_member() {
        let mut res = Resource::obs_placeholder(Flags::NEW);
        res.convert_to_observation();
        res.observation_mut().unwrap().json_extraction = "temp".to_string();

        let (dt, out) = res
            .accept(DataType::Json, Sample::json(5.0, r#"{"temp":21.5}"#), &pools())
            .unwrap()
            .unwrap();
        assert_eq!(dt, DataType::Numeric);
        assert_eq!(out.as_f64(), Some(21.5));

        // A document without the member is dropped, not an error.
        let out = res
            .accept(DataType::Json, Sample::json(6.0, r#"{"other":1}"#), &pools())
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_observation_transform_delivers_statistic() {
        let mut res = Resource::obs_placeholder(Flags::NEW);
        res.convert_to_observation();
        {
            let obs = res.observation_mut().unwrap();
            obs.buffer_max = 8;
            obs.transform = observation::Transform::Mean;
        }
        res.accept(DataType::Numeric, Sample::numeric(1.0, 2.0), &pools())
            .unwrap();
        let (_, out) = res
            .accept(DataType::Numeric, Sample::numeric(2.0, 4.0), &pools())
            .unwrap()
            .unwrap();
        assert_eq!(out.as_f64(), Some(3.0));
    }
}
