use serde_json::Value;

/// Drop every object field whose value is `null`, recursing into nested
/// objects and arrays. Array elements themselves are never removed.
pub fn prune_null_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(prune_null_fields);
        }
        Value::Array(items) => items.iter_mut().for_each(prune_null_fields),
        _ => {}
    }
}

/// Copy of `value` with null object fields removed.
pub fn without_null_fields(value: &Value) -> Value {
    let mut cloned = value.clone();
    prune_null_fields(&mut cloned);
    cloned
}
