//! Property maps and the string payload codec.
//!
//! The coordination service stores a single string per node; this module
//! owns the mapping between that string and the structured property map the
//! rest of the crate works with. The codec is an injected strategy so
//! deployments with a legacy payload convention can swap it out.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

/// String-keyed map of JSON-typed property values.
pub type PropertyMap = BTreeMap<String, Value>;

/// Key used to carry a raw, non-JSON node payload through a property map.
pub const STRING_VALUE_KEY: &str = "string_value";

/// Strategy for encoding a property map into the service's string payload.
pub trait PropertyCodec: Send + Sync {
    fn encode(&self, props: &PropertyMap) -> String;
    fn decode(&self, data: &str, path: &str) -> PropertyMap;
}

/// Default codec: a JSON object per node.
///
/// An empty map encodes as `"{}"` rather than the empty string; some
/// service client/server combinations corrupt empty payloads. A map holding
/// only `string_value` encodes as the raw string, so non-JSON payloads
/// written by other tooling round-trip unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPropertyCodec;

impl PropertyCodec for JsonPropertyCodec {
    fn encode(&self, props: &PropertyMap) -> String {
        if props.len() == 1 {
            if let Some(Value::String(s)) = props.get(STRING_VALUE_KEY) {
                return s.clone();
            }
        }
        serde_json::to_string(props).unwrap_or_else(|_| "{}".to_string())
    }

    fn decode(&self, data: &str, path: &str) -> PropertyMap {
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return PropertyMap::new();
        }
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            match serde_json::from_str::<PropertyMap>(trimmed) {
                Ok(map) => return map,
                Err(err) => {
                    warn!(path, %err, "bad json payload, treating as raw string");
                }
            }
        }
        let mut map = PropertyMap::new();
        map.insert(STRING_VALUE_KEY.to_string(), Value::String(data.to_string()));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_map_encodes_as_placeholder() {
        let codec = JsonPropertyCodec;
        assert_eq!(codec.encode(&PropertyMap::new()), "{}");
    }

    #[test]
    fn object_round_trip() {
        let codec = JsonPropertyCodec;
        let mut props = PropertyMap::new();
        props.insert("threads".into(), json!(2));
        props.insert("color".into(), json!("red"));
        let decoded = codec.decode(&codec.encode(&props), "/n");
        assert_eq!(decoded, props);
    }

    #[test]
    fn raw_payload_round_trips_through_string_value() {
        let codec = JsonPropertyCodec;
        let props = codec.decode("not json", "/n");
        assert_eq!(props.get(STRING_VALUE_KEY), Some(&json!("not json")));
        assert_eq!(codec.encode(&props), "not json");
    }

    #[test]
    fn malformed_object_falls_back_to_raw() {
        let codec = JsonPropertyCodec;
        let props = codec.decode("{oops}", "/n");
        assert_eq!(props.get(STRING_VALUE_KEY), Some(&json!("{oops}")));
    }

    #[test]
    fn empty_payload_decodes_to_empty_map() {
        let codec = JsonPropertyCodec;
        assert!(codec.decode("", "/n").is_empty());
        assert!(codec.decode("  ", "/n").is_empty());
    }
}
