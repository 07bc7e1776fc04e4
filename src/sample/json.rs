//! JSON rendering, parsing and member extraction for samples.

use serde_json::Value as Json;
use tracing::warn;

use super::{DataType, Sample, SamplePools, SampleRef, Value};
use crate::error::{Error, Result};

/// Render a sample as JSON text according to its holder's data type.
/// String content is escaped per RFC 8259; json content is copied
/// verbatim.
pub fn render_json(sample: &Sample, data_type: DataType) -> String {
    match (data_type, sample.value()) {
        (DataType::Trigger, _) => "null".to_string(),
        (DataType::Boolean, Value::Bool(b)) => if *b { "true" } else { "false" }.to_string(),
        (DataType::Numeric, Value::Numeric(n)) => render_number(*n),
        (DataType::String, Value::Text(s)) => {
            serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
        }
        (DataType::Json, Value::Text(s)) => s.clone(),
        (dt, _) => {
            warn!(data_type = dt.as_str(), "sample payload does not match its declared type");
            "null".to_string()
        }
    }
}

/// [`render_json`] with a byte budget covering the result plus a
/// terminator.
pub fn render_json_bounded(sample: &Sample, data_type: DataType, max_bytes: usize) -> Result<String> {
    let rendered = render_json(sample, data_type);
    if rendered.len() + 1 > max_bytes {
        return Err(Error::Overflow(max_bytes));
    }
    Ok(rendered)
}

/// JSON numbers have no form for NaN or the infinities.
pub(crate) fn render_number(n: f64) -> String {
    match serde_json::Number::from_f64(n) {
        Some(num) => num.to_string(),
        None => "null".to_string(),
    }
}

/// Parse JSON text into a sample plus the data type it implies:
/// `null` is a trigger, objects and arrays stay json text.
pub fn parse_json(timestamp: f64, text: &str) -> Result<(SampleRef, DataType)> {
    let parsed: Json = serde_json::from_str(text)
        .map_err(|e| Error::BadParameter(format!("invalid JSON: {e}")))?;
    Ok(sample_from_node(timestamp, &parsed))
}

fn sample_from_node(timestamp: f64, node: &Json) -> (SampleRef, DataType) {
    match node {
        Json::Null => (Sample::trigger(timestamp), DataType::Trigger),
        Json::Bool(b) => (Sample::boolean(timestamp, *b), DataType::Boolean),
        Json::Number(n) => (
            Sample::numeric(timestamp, n.as_f64().unwrap_or(f64::NAN)),
            DataType::Numeric,
        ),
        Json::String(s) => (Sample::string(timestamp, s.clone()), DataType::String),
        other => (Sample::json(timestamp, other.to_string()), DataType::Json),
    }
}

/// One step of an extraction spec.
#[derive(Debug, PartialEq)]
enum Step {
    Member(String),
    Index(usize),
}

/// Pull a member out of a JSON sample. `spec` is a dotted member path
/// with optional array indices, e.g. `position.coords[1]` or `[0].id`.
/// The result inherits the source sample's timestamp; its text storage
/// is charged to `pools`.
pub fn extract(sample: &Sample, spec: &str, pools: &SamplePools) -> Result<(SampleRef, DataType)> {
    let Value::Text(text) = sample.value() else {
        return Err(Error::BadParameter("sample does not carry JSON text".to_string()));
    };
    let root: Json = serde_json::from_str(text).map_err(|e| {
        warn!(spec, error = %e, "extraction source is not valid JSON");
        Error::BadParameter(format!("extraction source is not valid JSON: {e}"))
    })?;

    let mut node = &root;
    for step in parse_spec(spec)? {
        node = match (&step, node) {
            (Step::Member(name), Json::Object(map)) => map.get(name).ok_or_else(|| {
                warn!(spec, member = name.as_str(), "extraction member not found");
                Error::BadParameter(format!("no member {name:?} in JSON object"))
            })?,
            (Step::Index(i), Json::Array(items)) => items.get(*i).ok_or_else(|| {
                warn!(spec, index = i, "extraction index out of range");
                Error::BadParameter(format!("index {i} out of range"))
            })?,
            _ => {
                warn!(spec, "extraction step does not match JSON structure");
                return Err(Error::BadParameter(format!(
                    "step {step:?} does not match the JSON structure"
                )));
            }
        };
    }

    let timestamp = sample.timestamp();
    Ok(match node {
        Json::Null => (Sample::trigger(timestamp), DataType::Trigger),
        Json::Bool(b) => (Sample::boolean(timestamp, *b), DataType::Boolean),
        Json::Number(n) => (
            Sample::numeric(timestamp, n.as_f64().unwrap_or(f64::NAN)),
            DataType::Numeric,
        ),
        Json::String(s) => (pools.string_sample(timestamp, s.clone())?, DataType::String),
        other => (pools.json_sample(timestamp, other.to_string())?, DataType::Json),
    })
}

fn parse_spec(spec: &str) -> Result<Vec<Step>> {
    let malformed = || Error::BadParameter(format!("malformed extraction spec {spec:?}"));
    let mut steps = Vec::new();
    let mut rest = spec;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('[') {
            let (digits, tail) = tail.split_once(']').ok_or_else(malformed)?;
            let index: usize = digits.parse().map_err(|_| malformed())?;
            steps.push(Step::Index(index));
            rest = tail.strip_prefix('.').unwrap_or(tail);
        } else {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            if end == 0 {
                return Err(malformed());
            }
            steps.push(Step::Member(rest[..end].to_string()));
            rest = &rest[end..];
            rest = rest.strip_prefix('.').unwrap_or(rest);
        }
    }
    if steps.is_empty() {
        return Err(malformed());
    }
    Ok(steps)
}
