//! Access token payload merging.
//!
//! Payloads are ordered JSON objects. Merging keeps the position of keys that
//! already exist, appends new keys in the order they appear in the update, and
//! treats explicit nulls according to the negotiated [`NullHandling`].

use serde_json::{Map, Value};

use crate::NullHandling;

/// Merges caller updates into an existing payload without touching either input.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadMerger {
    null_handling: NullHandling,
}

impl PayloadMerger {
    pub fn new(null_handling: NullHandling) -> Self {
        Self { null_handling }
    }

    pub fn null_handling(&self) -> NullHandling {
        self.null_handling
    }

    pub fn merge(&self, existing: &Map<String, Value>, updates: &Map<String, Value>) -> Map<String, Value> {
        merge_payload(existing, updates, self.null_handling)
    }
}

/// Merges `updates` into `existing`.
///
/// Existing keys are overwritten in place, new keys are appended. Under
/// [`NullHandling::Drop`] a null update removes the key and nulls nested in
/// updated values are stripped; under [`NullHandling::Preserve`] values are
/// stored verbatim.
pub fn merge_payload(
    existing: &Map<String, Value>,
    updates: &Map<String, Value>,
    null_handling: NullHandling,
) -> Map<String, Value> {
    let mut merged = Map::new();

    for (key, current) in existing {
        match updates.get(key) {
            Some(update) => {
                if let Some(value) = normalize(update, null_handling) {
                    merged.insert(key.clone(), value);
                }
            }
            None => {
                merged.insert(key.clone(), current.clone());
            }
        }
    }

    for (key, update) in updates {
        if existing.contains_key(key) {
            continue;
        }
        if let Some(value) = normalize(update, null_handling) {
            merged.insert(key.clone(), value);
        }
    }

    merged
}

/// Returns `None` when the value should not be stored at all.
fn normalize(value: &Value, null_handling: NullHandling) -> Option<Value> {
    match null_handling {
        NullHandling::Preserve => Some(value.clone()),
        NullHandling::Drop => match value {
            Value::Null => None,
            other => Some(strip_nulls(other)),
        },
    }
}

/// Recursively removes null-valued keys from nested objects.
///
/// Nulls inside arrays are kept; only object keys are dropped.
pub fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}
