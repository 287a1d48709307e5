//! Layered merging of untyped configuration trees.
//!
//! Later layers override earlier ones leaf by leaf: a partial override of one
//! vendor block replaces only the keys it names and keeps its siblings.
//! Lists are leaves and are replaced whole.

use serde_json::{Map, Value};

/// Merge `overlay` onto `base`, with `overlay` taking precedence.
///
/// - Tables are merged recursively.
/// - Lists, strings, numbers and booleans are replaced.
/// - A null in the overlay means "not specified" and keeps the base value.
///
/// # Example
/// ```
/// use serde_json::json;
/// use robot_agent_config::config::deep_merge;
///
/// let base = json!({
///     "openai": { "simple_model": "gpt-4o-mini", "base_url": "https://api.openai.com/v1/" }
/// });
/// let overlay = json!({
///     "openai": { "base_url": "http://proxy:8080/v1/" }
/// });
/// let merged = deep_merge(base, overlay);
/// assert_eq!(merged["openai"]["simple_model"], "gpt-4o-mini");
/// assert_eq!(merged["openai"]["base_url"], "http://proxy:8080/v1/");
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Merge an ordered sequence of layers, lowest priority first.
///
/// Always returns a table, even for an empty sequence. Object keys are kept
/// sorted, so the same input sequence serializes to the same bytes.
pub fn load_layers(layers: impl IntoIterator<Item = Value>) -> Value {
    layers
        .into_iter()
        .fold(Value::Object(Map::new()), deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_vendor_override_keeps_siblings() {
        let base = json!({
            "ollama": {
                "simple_model": "llama3.2",
                "complex_model": "llama3.1:70b",
                "base_url": "http://localhost:11434"
            }
        });
        let overlay = json!({"ollama": {"base_url": "http://jetson:11434"}});
        let result = deep_merge(base, overlay);
        assert_eq!(
            result,
            json!({
                "ollama": {
                    "simple_model": "llama3.2",
                    "complex_model": "llama3.1:70b",
                    "base_url": "http://jetson:11434"
                }
            })
        );
    }

    #[test]
    fn test_lists_are_replaced() {
        let base = json!({"max_velocity": [0.5, 0.0, 2.0]});
        let overlay = json!({"max_velocity": [0.3, 0.0]});
        assert_eq!(deep_merge(base, overlay), json!({"max_velocity": [0.3, 0.0]}));
    }

    #[test]
    fn test_null_preserves_base() {
        let base = json!({"a": 1, "b": {"c": 2}});
        let overlay = json!({"a": null, "b": {"c": null}});
        assert_eq!(deep_merge(base, overlay), json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn test_scalar_and_table_replace_each_other() {
        assert_eq!(
            deep_merge(json!({"tts": "elevenlabs"}), json!({"tts": {"vendor": "opentts"}})),
            json!({"tts": {"vendor": "opentts"}})
        );
        assert_eq!(
            deep_merge(json!({"tts": {"vendor": "opentts"}}), json!({"tts": 3})),
            json!({"tts": 3})
        );
    }

    #[test]
    fn test_later_layer_wins() {
        let layers = vec![
            json!({"vendor": {"simple_model": "openai"}}),
            json!({"vendor": {"complex_model": "aws"}}),
            json!({"vendor": {"simple_model": "ollama"}}),
        ];
        assert_eq!(
            load_layers(layers),
            json!({"vendor": {"simple_model": "ollama", "complex_model": "aws"}})
        );
    }

    #[test]
    fn test_empty_sequence_is_empty_table() {
        assert_eq!(load_layers(Vec::new()), json!({}));
    }

    #[test]
    fn test_load_layers_is_deterministic() {
        let layers = || {
            vec![
                json!({"zeta": 1, "alpha": {"b": 2, "a": 1}}),
                json!({"alpha": {"c": 3}}),
            ]
        };
        let first = serde_json::to_string(&load_layers(layers())).unwrap();
        let second = serde_json::to_string(&load_layers(layers())).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, r#"{"alpha":{"a":1,"b":2,"c":3},"zeta":1}"#);
    }
}
