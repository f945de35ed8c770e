//! # Payload Transforms
//!
//! Bidirectional transform between nested JSON and flat prefixed keys.
//!
//! ## Flatten (nested -> flat)
//! ```text
//!  prefix = "beacon.device.SN1", root = true
//!
//!  {                                   beacon.device.SN1.temperature      = 21.5
//!    "temperature": 21.5,      ──►     beacon.device.SN1.gps@lat          = 1.2
//!    "gps": {"lat": 1.2,               beacon.device.SN1.gps@fix@quality  = 3
//!            "fix": {"quality": 3}},
//!    "tags": ["a"],                    (arrays and nulls are dropped)
//!    "note": null
//!  }
//! ```
//! The separator is `.` between the prefix and a root-level field and `@`
//! everywhere below. Nested mode (`root = false`) uses `@` from the start;
//! it is used for event/service parameter objects keyed under their entity.
//!
//! ## Group (flat -> nested)
//! The inverse: keys under a prefix are split on `.`/`@` and rebuilt into an
//! object tree. A key whose path runs into a non-object node is dropped.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CoreResult;
use crate::keys::{NESTED_SEPARATOR, ROOT_SEPARATOR};
use crate::types::ExchangePayload;

// =============================================================================
// Flatten
// =============================================================================

struct Frame<'a> {
    prefix: String,
    object: &'a Map<String, Value>,
    root_level: bool,
}

/// Flattens `value` into a payload keyed under `prefix`.
///
/// Returns `None` when `value` is not an object or yields no keys.
pub fn flatten(prefix: &str, value: &Value, is_root: bool) -> Option<ExchangePayload> {
    let object = value.as_object().filter(|o| !o.is_empty())?;

    let mut payload = ExchangePayload::new();
    let mut stack = vec![Frame {
        prefix: prefix.to_string(),
        object,
        root_level: is_root,
    }];

    while let Some(frame) = stack.pop() {
        let separator = if frame.root_level {
            ROOT_SEPARATOR
        } else {
            NESTED_SEPARATOR
        };
        for (field, value) in frame.object {
            let key = format!("{}{separator}{field}", frame.prefix);
            match value {
                Value::Null => debug!(%key, "Null value ignored"),
                Value::Array(_) => debug!(%key, "Array values are not supported"),
                Value::Object(object) => stack.push(Frame {
                    prefix: key,
                    object,
                    root_level: false,
                }),
                scalar => payload.insert(key, scalar.clone()),
            }
        }
    }

    (!payload.is_empty()).then_some(payload)
}

// =============================================================================
// Group
// =============================================================================

/// Rebuilds the object tree of every key under `prefix`.
///
/// Keys outside the prefix, the prefix itself and null values are ignored.
/// A repeated top-level field keeps its first value.
pub fn group(prefix: &str, values: &BTreeMap<String, Value>) -> Map<String, Value> {
    let mut result = Map::new();

    'keys: for (key, value) in values {
        let Some(suffix) = strip_key_prefix(key, prefix) else {
            debug!(%key, %prefix, "Key outside prefix ignored");
            continue;
        };
        if value.is_null() {
            debug!(%key, "Null value ignored");
            continue;
        }

        let segments: Vec<&str> = suffix
            .split([ROOT_SEPARATOR, NESTED_SEPARATOR])
            .filter(|s| !s.is_empty())
            .collect();
        let Some((leaf, path)) = segments.split_last() else {
            debug!(%key, "Key has no field path");
            continue;
        };

        let Some((first, middle)) = path.split_first() else {
            result
                .entry(leaf.to_string())
                .or_insert_with(|| value.clone());
            continue;
        };

        let mut node = result
            .entry(first.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        for segment in middle {
            let Value::Object(object) = node else {
                debug!(%key, %segment, "Path crosses a non-object node");
                continue 'keys;
            };
            node = object
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        match node {
            Value::Object(object) => {
                object.insert(leaf.to_string(), value.clone());
            }
            _ => debug!(%key, "Parent of leaf is not an object"),
        }
    }
    result
}

/// Groups the keys under `prefix` and decodes them into `T`.
///
/// Returns `Ok(None)` when nothing lives under the prefix.
pub fn decode_grouped<T: DeserializeOwned>(
    prefix: &str,
    values: &BTreeMap<String, Value>,
) -> CoreResult<Option<T>> {
    let grouped = group(prefix, values);
    if grouped.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(Value::Object(grouped))?))
}

fn strip_key_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    rest.strip_prefix(ROOT_SEPARATOR)
        .or_else(|| rest.strip_prefix(NESTED_SEPARATOR))
}
