//! Standard channel reducers
//!
//! Reducers are binary merge functions `(current, update) -> next` applied
//! at commit time in a deterministic order. These constructors cover the
//! common shapes; custom reducers are any [`ReducerFn`].
//!
//! All reducers here are total over the value shapes their channels declare
//! and report shape violations as errors rather than coercing, so a broken
//! write aborts the commit instead of silently corrupting state.

use crate::channel::ReducerFn;
use serde_json::Value;
use std::sync::Arc;

/// Last write wins: the update replaces the current value
pub fn last_value() -> ReducerFn {
    Arc::new(|_current, update| Ok(update))
}

/// Ordered concatenation of arrays
///
/// Both sides must be arrays. Use [`append_or_empty`] when the channel may
/// hold `null` for "nothing yet".
pub fn append() -> ReducerFn {
    Arc::new(|current, update| {
        let mut items = as_array(current, "append")?;
        items.extend(as_array(update, "append")?);
        Ok(Value::Array(items))
    })
}

/// Ordered concatenation treating `null` as the empty array
pub fn append_or_empty() -> ReducerFn {
    Arc::new(|current, update| {
        let mut items = as_array_or_empty(current, "append_or_empty")?;
        items.extend(as_array_or_empty(update, "append_or_empty")?);
        Ok(Value::Array(items))
    })
}

/// Set union over arrays
///
/// Keeps the current side's order, then appends update elements not already
/// present. Element identity is JSON value equality.
pub fn set_union() -> ReducerFn {
    Arc::new(|current, update| {
        let mut items = as_array_or_empty(current, "set_union")?;
        for item in as_array_or_empty(update, "set_union")? {
            if !items.contains(&item) {
                items.push(item);
            }
        }
        Ok(Value::Array(items))
    })
}

/// Keyed map merge parameterised by a per-value reducer
///
/// Both sides must be objects (or `null`, treated as empty). Update keys are
/// processed in ascending UTF-8 order; a key present on both sides merges
/// via `per_value`, a new key is inserted as-is.
pub fn merge_map(per_value: ReducerFn) -> ReducerFn {
    Arc::new(move |current, update| {
        let mut merged = as_object_or_empty(current, "merge_map")?;
        let incoming = as_object_or_empty(update, "merge_map")?;
        let mut keys: Vec<String> = incoming.keys().cloned().collect();
        keys.sort_unstable();
        for key in keys {
            let value = incoming[&key].clone();
            match merged.remove(&key) {
                Some(existing) => {
                    merged.insert(key, per_value(existing, value)?);
                }
                None => {
                    merged.insert(key, value);
                }
            }
        }
        Ok(Value::Object(merged))
    })
}

fn as_array(value: Value, reducer: &str) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(format!("{} expects arrays, got {}", reducer, kind(&other))),
    }
}

fn as_array_or_empty(value: Value, reducer: &str) -> Result<Vec<Value>, String> {
    match value {
        Value::Null => Ok(vec![]),
        other => as_array(other, reducer),
    }
}

fn as_object_or_empty(
    value: Value,
    reducer: &str,
) -> Result<serde_json::Map<String, Value>, String> {
    match value {
        Value::Null => Ok(serde_json::Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(format!("{} expects objects, got {}", reducer, kind(&other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
