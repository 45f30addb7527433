//! # FIELD VALUE HELPERS
//!
//! Field values are plain JSON values. A scope's form data maps field names to values.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Field name -> current value for one scope.
pub type FormData = HashMap<String, JsonValue>;

/// Trim string values; every other value is returned unchanged.
pub fn normalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(s.trim().to_string()),
        other => other.clone(),
    }
}

/// A value counts as empty when it is null, a blank string, or an empty list/map.
pub fn is_empty(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Bool(_) | JsonValue::Number(_) => false,
    }
}

/// Numeric view of a value. Numeric strings are accepted.
pub fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Text used for message placeholders and string comparisons.
pub fn display(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}
