//! Field-by-field merging of configuration tiers.
//!
//! Tiers are parsed into `serde_json::Value` and folded together before the
//! result is deserialized into [`Config`](super::Config). Objects merge
//! recursively; every other value in a higher tier replaces the lower one.

use serde_json::Value;

/// Deep merge two values, with `overlay` taking precedence over `base`.
///
/// A `null` in `overlay` means "not specified" and keeps the base value.
///
/// ```
/// use serde_json::json;
/// use nested_todo::config::deep_merge;
///
/// let defaults = json!({ "server": { "host": "127.0.0.1", "port": 3000 } });
/// let project = json!({ "server": { "port": 8080 } });
/// assert_eq!(
///     deep_merge(defaults, project),
///     json!({ "server": { "host": "127.0.0.1", "port": 8080 } })
/// );
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Merge tiers in order, later tiers winning.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}
