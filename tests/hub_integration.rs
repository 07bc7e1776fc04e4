//! End-to-end scenarios: promotion, change events, routing, the admin
//! update window and the observation pipeline.

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use fluxhub::{
    ChangeEvent, ChangeOp, DataType, EntryKind, Error, Hub, HubConfig, Sample, Transform,
};

fn hub() -> Hub {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
    Hub::new(HubConfig::default())
}

/// Record every change event for later assertions.
fn record_events(hub: &Hub) -> Rc<RefCell<Vec<ChangeEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    hub.add_change_listener(move |e| sink.borrow_mut().push(e.clone()));
    events
}

// ============================================================================
// Creation and change events
// ============================================================================

#[test]
fn test_create_input_fires_added_once() {
    let hub = hub();
    let events = record_events(&hub);

    let placeholder = hub.get_resource(hub.root(), "a/b").unwrap();
    assert_eq!(placeholder.kind(), EntryKind::Placeholder);
    let entry = hub
        .create_input(hub.root(), "a/b", DataType::Numeric, "degC")
        .unwrap();
    assert!(Rc::ptr_eq(&placeholder, &entry));
    assert_eq!(entry.kind(), EntryKind::Input);
    assert_eq!(hub.units(&entry), "degC");

    // Replay adds nothing.
    hub.create_input(hub.root(), "a/b", DataType::Numeric, "degC")
        .unwrap();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, "/a/b");
    assert_eq!(events[0].kind, EntryKind::Input);
    assert_eq!(events[0].op, ChangeOp::Added);
}

#[test]
fn test_observation_creation_is_idempotent() {
    let hub = hub();
    let events = record_events(&hub);

    let first = hub.get_observation(hub.root(), "obs/temp_avg").unwrap();
    let again = hub.get_observation(hub.root(), "obs/temp_avg").unwrap();
    assert!(Rc::ptr_eq(&first, &again));

    // The auto-created observation namespace is an ancestor.
    let ns = hub.find_entry(hub.root(), "obs").unwrap();
    assert!(Rc::ptr_eq(&ns, first.parent().unwrap()));

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, "/obs/temp_avg");
    assert_eq!(events[0].op, ChangeOp::Added);
}

#[test]
fn test_delete_with_admin_settings_keeps_placeholder() {
    let hub = hub();
    let entry = hub
        .create_input(hub.root(), "x", DataType::Numeric, "V")
        .unwrap();
    hub.set_override(&entry, DataType::Numeric, Sample::numeric(1.0, 9.0))
        .unwrap();

    let events = record_events(&hub);
    hub.delete_io(&entry).unwrap();

    assert_eq!(entry.kind(), EntryKind::Placeholder);
    assert!(hub.has_override(&entry));

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, "/x");
    assert_eq!(events[0].kind, EntryKind::Input);
    assert_eq!(events[0].op, ChangeOp::Removed);
}

#[test]
fn test_removed_listener_can_still_query_resource() {
    let hub = hub();
    let entry = hub
        .create_input(hub.root(), "x", DataType::Numeric, "V")
        .unwrap();
    hub.push(&entry, DataType::Numeric, Sample::numeric(1.0, 3.0))
        .unwrap();

    let seen = Rc::new(RefCell::new(None));
    {
        let hub_entry = Rc::clone(&entry);
        let seen = Rc::clone(&seen);
        // REMOVED fires before the resource is released, so the
        // departing value is still readable. Reading is allowed;
        // mutation during dispatch is not.
        hub.add_change_listener(move |e| {
            if e.op == ChangeOp::Removed {
                *seen.borrow_mut() = hub_entry.kind().into();
            }
        });
    }
    hub.delete_io(&entry).unwrap();
    assert_eq!(*seen.borrow(), Some(EntryKind::Input));
}

// ============================================================================
// Push and routing
// ============================================================================

#[test]
fn test_push_flows_through_route() {
    let hub = hub();
    let input = hub
        .create_input(hub.root(), "x", DataType::Numeric, "")
        .unwrap();
    let output = hub
        .create_output(hub.root(), "y", DataType::Numeric, "")
        .unwrap();
    hub.set_source(&output, Some(&input)).unwrap();

    hub.push(&input, DataType::Numeric, Sample::numeric(10.0, 2.5))
        .unwrap();
    let (dt, sample) = hub.current_value(&output).unwrap();
    assert_eq!(dt, DataType::Numeric);
    assert_eq!(sample.as_f64(), Some(2.5));
    assert_eq!(sample.timestamp(), 10.0);
}

#[test]
fn test_cycle_rejected_and_graph_unchanged() {
    let hub = hub();
    let x = hub.create_input(hub.root(), "x", DataType::Numeric, "").unwrap();
    let y = hub.create_input(hub.root(), "y", DataType::Numeric, "").unwrap();
    let z = hub.create_input(hub.root(), "z", DataType::Numeric, "").unwrap();

    hub.set_source(&y, Some(&x)).unwrap();
    hub.set_source(&z, Some(&y)).unwrap();

    assert_eq!(hub.set_source(&x, Some(&z)).unwrap_err(), Error::Duplicate);
    assert!(hub.get_source(&x).is_none());
    assert!(Rc::ptr_eq(&hub.get_source(&z).unwrap(), &y));

    // Self-routing is the shortest cycle.
    assert_eq!(hub.set_source(&x, Some(&x)).unwrap_err(), Error::Duplicate);
}

#[test]
fn test_clearing_route_stops_flow() {
    let hub = hub();
    let input = hub.create_input(hub.root(), "x", DataType::Numeric, "").unwrap();
    let output = hub.create_output(hub.root(), "y", DataType::Numeric, "").unwrap();

    hub.set_source(&output, Some(&input)).unwrap();
    hub.push(&input, DataType::Numeric, Sample::numeric(1.0, 1.0)).unwrap();

    hub.set_source(&output, None).unwrap();
    assert!(hub.get_source(&output).is_none());
    hub.push(&input, DataType::Numeric, Sample::numeric(2.0, 2.0)).unwrap();
    assert_eq!(hub.current_value(&output).unwrap().1.as_f64(), Some(1.0));
}

#[test]
fn test_push_to_namespace_is_rejected() {
    let hub = hub();
    let ns = hub.get_entry(hub.root(), "plain").unwrap();
    let err = hub
        .push(&ns, DataType::Numeric, Sample::numeric(1.0, 1.0))
        .unwrap_err();
    assert!(matches!(err, Error::BadParameter(_)));
}

#[test]
fn test_push_type_mismatch() {
    let hub = hub();
    let input = hub.create_input(hub.root(), "x", DataType::Numeric, "").unwrap();
    let err = hub
        .push(&input, DataType::String, Sample::string(1.0, "nope"))
        .unwrap_err();
    assert!(matches!(err, Error::BadParameter(_)));
}

#[test]
fn test_push_handler_observes_accepted_samples() {
    let hub = hub();
    let input = hub.create_input(hub.root(), "x", DataType::Numeric, "").unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    hub.add_push_handler(&input, move |dt, sample| {
        sink.borrow_mut().push((dt, sample.as_f64()));
    })
    .unwrap();

    hub.push(&input, DataType::Numeric, Sample::numeric(1.0, 4.0)).unwrap();
    hub.push(&input, DataType::Numeric, Sample::numeric(2.0, 5.0)).unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![(DataType::Numeric, Some(4.0)), (DataType::Numeric, Some(5.0))]
    );
}

// ============================================================================
// Admin update window
// ============================================================================

#[test]
fn test_update_window_refuses_external_pushes() {
    let hub = hub();
    let input = hub.create_input(hub.root(), "x", DataType::Numeric, "").unwrap();

    hub.start_update();
    assert!(hub.is_updating());
    let err = hub
        .push(&input, DataType::Numeric, Sample::numeric(1.0, 1.0))
        .unwrap_err();
    assert_eq!(err, Error::InProgress);
    hub.end_update();

    assert!(hub.current_value(&input).is_none());
    hub.push(&input, DataType::Numeric, Sample::numeric(1.0, 1.0)).unwrap();
    assert!(hub.current_value(&input).is_some());
}

#[test]
fn test_route_changes_coalesce_until_end_update() {
    let hub = hub();
    let a = hub.create_input(hub.root(), "a", DataType::Numeric, "").unwrap();
    let b = hub.create_input(hub.root(), "b", DataType::Numeric, "").unwrap();
    let out = hub.create_output(hub.root(), "out", DataType::Numeric, "").unwrap();

    hub.push(&a, DataType::Numeric, Sample::numeric(1.0, 10.0)).unwrap();
    hub.push(&b, DataType::Numeric, Sample::numeric(2.0, 20.0)).unwrap();

    hub.start_update();
    // Rerouting twice within the window: only the latest source's
    // current value lands when the window closes.
    hub.set_source(&out, Some(&a)).unwrap();
    hub.set_source(&out, Some(&b)).unwrap();
    assert!(hub.current_value(&out).is_none());

    hub.end_update();
    assert_eq!(hub.current_value(&out).unwrap().1.as_f64(), Some(20.0));
}

// ============================================================================
// Observation pipeline
// ============================================================================

#[test]
fn test_observation_filters_and_buffers_routed_stream() {
    let hub = hub();
    let input = hub
        .create_input(hub.root(), "temp", DataType::Numeric, "degC")
        .unwrap();
    let obs = hub.get_observation(hub.root(), "obs/temp_avg").unwrap();

    hub.set_buffer_max_count(&obs, 16).unwrap();
    hub.set_high_limit(&obs, 100.0).unwrap();
    hub.set_source(&obs, Some(&input)).unwrap();

    for (t, v) in [(1.0, 20.0), (2.0, 150.0), (3.0, 30.0), (4.0, 40.0)] {
        hub.push(&input, DataType::Numeric, Sample::numeric(t, v)).unwrap();
    }

    // 150 was filtered by the high limit.
    assert_eq!(hub.query_min(&obs, f64::NAN).unwrap(), 20.0);
    assert_eq!(hub.query_max(&obs, f64::NAN).unwrap(), 40.0);
    assert_eq!(hub.query_mean(&obs, f64::NAN).unwrap(), 30.0);
    assert_eq!(hub.current_value(&obs).unwrap().1.as_f64(), Some(40.0));
}

#[test]
fn test_observation_extraction_from_json_stream() {
    let hub = hub();
    let input = hub
        .create_input(hub.root(), "gps", DataType::Json, "")
        .unwrap();
    let obs = hub.get_observation(hub.root(), "obs/lat").unwrap();
    hub.set_json_extraction(&obs, "position.lat").unwrap();
    hub.set_source(&obs, Some(&input)).unwrap();

    hub.push(
        &input,
        DataType::Json,
        Sample::json(5.0, r#"{"position":{"lat":48.8,"lon":2.3}}"#),
    )
    .unwrap();

    let (dt, sample) = hub.current_value(&obs).unwrap();
    assert_eq!(dt, DataType::Numeric);
    assert_eq!(sample.as_f64(), Some(48.8));
    assert_eq!(sample.timestamp(), 5.0);
}

#[test]
fn test_buffer_dump_to_file() {
    let hub = hub();
    let obs = hub.get_observation(hub.root(), "obs/log").unwrap();
    hub.set_buffer_max_count(&obs, 8).unwrap();
    hub.push(&obs, DataType::Numeric, Sample::numeric(1.5, 2.0)).unwrap();
    hub.push(&obs, DataType::Numeric, Sample::numeric(2.5, 4.0)).unwrap();

    let mut file = tempfile::tempfile().unwrap();
    hub.read_buffer_json(&obs, &mut file, f64::NAN).unwrap();

    use std::io::Seek;
    file.rewind().unwrap();
    let mut text = String::new();
    file.read_to_string(&mut text).unwrap();
    assert_eq!(text, r#"[{"t":1.5,"v":2.0},{"t":2.5,"v":4.0}]"#);

    let first = hub.find_buffered_sample_after(&obs, f64::NAN).unwrap().unwrap();
    assert_eq!(first.timestamp(), 1.5);
}

// ============================================================================
// Facade kind guards
// ============================================================================

#[test]
fn test_facade_guards_are_uniform() {
    let hub = hub();
    let input = hub.create_input(hub.root(), "x", DataType::Numeric, "").unwrap();

    assert!(hub.set_min_period(&input, 1.0).is_err());
    assert!(hub.set_transform(&input, Transform::Mean).is_err());
    assert!(hub.query_mean(&input, f64::NAN).is_err());

    // Getters degrade to neutral values instead of failing.
    assert!(hub.min_period(&input).is_nan());
    assert_eq!(hub.buffer_max_count(&input), 0);
    assert_eq!(hub.json_extraction(&input), "");
    assert_eq!(hub.transform(&input), Transform::None);
}

#[test]
fn test_io_created_under_observation_namespace_is_plain_io() {
    let hub = hub();
    let placeholder = hub.get_resource(hub.root(), "/obs/raw").unwrap();
    // Observation-flavored placeholder: filter settings stick.
    hub.set_high_limit(&placeholder, 50.0).unwrap();

    let input = hub
        .create_input(hub.root(), "/obs/raw", DataType::Numeric, "V")
        .unwrap();
    assert!(Rc::ptr_eq(&placeholder, &input));
    assert_eq!(input.kind(), EntryKind::Input);

    // Typed as an input it is io like any other, wherever it lives.
    assert!(hub.set_high_limit(&input, 50.0).is_err());
    assert!(hub.high_limit(&input).is_nan());
    assert!(hub.query_mean(&input, f64::NAN).is_err());

    // And pushes bypass the observation filters entirely.
    hub.push(&input, DataType::Numeric, Sample::numeric(1.0, 120.0))
        .unwrap();
    assert_eq!(hub.current_value(&input).unwrap().1.as_f64(), Some(120.0));
}

#[test]
fn test_default_value_applies_on_creation() {
    let hub = hub();
    let placeholder = hub.get_resource(hub.root(), "cfg").unwrap();
    hub.set_default(&placeholder, DataType::Numeric, Sample::numeric(1.0, 7.5))
        .unwrap();

    let input = hub
        .create_input(hub.root(), "cfg", DataType::Numeric, "")
        .unwrap();
    assert_eq!(hub.current_value(&input).unwrap().1.as_f64(), Some(7.5));
}

#[test]
fn test_json_example_changed_flag() {
    let hub = hub();
    let input = hub.create_input(hub.root(), "x", DataType::Json, "").unwrap();
    hub.set_json_example(&input, Sample::json(1.0, r#"{"a":1}"#)).unwrap();
    assert!(hub.json_example_changed(&input));
    hub.clear_json_example_changed(&input).unwrap();
    assert!(!hub.json_example_changed(&input));
    // Setting the same example again does not re-flag.
    hub.set_json_example(&input, Sample::json(2.0, r#"{"a":1}"#)).unwrap();
    assert!(!hub.json_example_changed(&input));
}
