use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// String field of a JSON object, if present and a string.
pub fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Owned, non-empty string field.
pub fn string_field(value: &Value, key: &str) -> Option<String> {
    str_field(value, key)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numeric field. Numbers encoded as strings (`"42.5"`) are accepted too.
pub fn f64_field(value: &Value, key: &str) -> Option<f64> {
    as_f64(value.get(key)?)
}

pub fn u32_field(value: &Value, key: &str) -> Option<u32> {
    as_u32(value.get(key)?)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    as_f64(value)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n.min(u32::MAX as f64) as u32)
}

fn as_strings(value: &Value) -> Option<Vec<String>> {
    value.as_array().map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

pub fn bool_field(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

/// True when the key exists and is not `null`.
pub fn has_field(value: &Value, key: &str) -> bool {
    value.get(key).is_some_and(|v| !v.is_null())
}

/// True only when the field is a JSON number (strings do not count).
pub fn is_number_field(value: &Value, key: &str) -> bool {
    value.get(key).is_some_and(Value::is_number)
}

// `deserialize_with` adapters for producer quirks: explicit `null`, float
// counts and numeric labels decode instead of failing the enclosing value.

/// `null` decodes as `T::default()`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Non-negative integer, also from `3.0` or `"3"`. Anything else is `None`.
pub fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(as_u32(&Value::deserialize(deserializer)?))
}

/// `0.0` for `null` or a non-numeric value. Numeric strings are accepted.
pub fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(as_f64(&Value::deserialize(deserializer)?).unwrap_or_default())
}

/// Strings as-is, numbers and booleans rendered, everything else `None`.
pub fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// String items of an array; other items are dropped. Non-arrays are `None`.
pub fn lenient_strings<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error> {
    Ok(as_strings(&Value::deserialize(deserializer)?))
}

/// Like [`lenient_strings`], with a missing list read as empty.
pub fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(lenient_strings(deserializer)?.unwrap_or_default())
}
