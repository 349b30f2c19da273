//! Byte-encoding contract for channel values.
//!
//! Backends serialize through this trait rather than calling a codec
//! directly, so an encrypting or compressing wrapper can sit between the
//! engine and the store without changing the store contract.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SerializerError {
    #[error("failed to encode value: {0}")]
    #[diagnostic(code(loomgraph::serializer::encode))]
    Encode(String),

    #[error("failed to decode value: {0}")]
    #[diagnostic(code(loomgraph::serializer::decode))]
    Decode(String),
}

/// Lossless byte codec for the engine's value model (numbers, text,
/// booleans, sequences, mappings, nested combinations).
pub trait Serializer: Send + Sync {
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, SerializerError>;
    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, SerializerError>;
}

/// Default codec: compact JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        serde_json::to_vec(value).map_err(|e| SerializerError::Encode(e.to_string()))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
        serde_json::from_slice(bytes).map_err(|e| SerializerError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_preserves_structure() {
        let value = json!({
            "n": 42,
            "f": 1.5,
            "s": "text",
            "b": true,
            "seq": [1, "two", {"three": 3}],
            "map": {"nested": {"deep": null}}
        });
        let ser = JsonSerializer;
        let bytes = ser.to_bytes(&value).unwrap();
        assert_eq!(ser.from_bytes(&bytes).unwrap(), value);
    }
}
