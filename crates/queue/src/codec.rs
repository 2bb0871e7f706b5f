//! JSON payload shapes carried by queue messages.
//!
//! - A single-entity task is serialized directly as a JSON object.
//! - A batch task is serialized as `{"payload": [...]}` via [`Batch`].
//!
//! Consumers decode into the concrete type they expect; the shape is fixed
//! per task type at compile time.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// Envelope for batch tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch<T> {
    pub payload: Vec<T>,
}

impl<T> Batch<T> {
    pub fn new(payload: Vec<T>) -> Self {
        Self { payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.payload.iter()
    }
}

impl<T> From<Vec<T>> for Batch<T> {
    fn from(payload: Vec<T>) -> Self {
        Self { payload }
    }
}

pub fn encode<T: Serialize>(item: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(item).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Row {
        id: String,
        processed: bool,
    }

    #[test]
    fn single_item_is_a_bare_object() {
        let bytes = encode(&Row { id: "a".into(), processed: false }).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, serde_json::json!({"id": "a", "processed": false}));
    }

    #[test]
    fn batch_is_wrapped_in_payload_key() {
        let batch = Batch::new(vec![Row { id: "a".into(), processed: false }]);
        let value: serde_json::Value = serde_json::from_slice(&encode(&batch).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"payload": [{"id": "a", "processed": false}]})
        );
    }

    #[test]
    fn decoding_the_wrong_shape_fails() {
        let bytes = encode(&Row { id: "a".into(), processed: false }).unwrap();
        assert!(matches!(decode::<Batch<Row>>(&bytes), Err(CodecError::Decode(_))));
    }

    proptest! {
        #[test]
        fn batch_survives_transport(ids in proptest::collection::vec("[a-z0-9-]{1,12}", 0..20)) {
            let batch = Batch::new(ids.iter().map(|id| Row { id: id.clone(), processed: false }).collect());
            let back: Batch<Row> = decode(&encode(&batch).unwrap()).unwrap();
            prop_assert_eq!(back, batch);
        }
    }
}
