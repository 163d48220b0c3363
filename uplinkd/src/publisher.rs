//! Telemetry payload construction.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{LinkError, MAX_BATCH_POINTS};

/// Single-point publish shape.
#[derive(Debug, Serialize)]
struct Point<'a> {
    name: &'a str,
    value: f64,
}

/// JSON for a single named value.
pub fn point(name: &str, value: f64) -> Result<String, LinkError> {
    Ok(serde_json::to_string(&Point { name, value })?)
}

/// JSON object for a batch; keys are the channel names. A batch larger
/// than [`MAX_BATCH_POINTS`] is refused outright.
pub fn batch(points: &[(String, f64)]) -> Result<String, LinkError> {
    if points.len() > MAX_BATCH_POINTS {
        return Err(LinkError::BatchTooLarge(points.len()));
    }
    let mut object = Map::new();
    for (name, value) in points {
        object.insert(name.clone(), Value::from(*value));
    }
    Ok(serde_json::to_string(&Value::Object(object))?)
}
