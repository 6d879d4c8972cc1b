//! The unit of data exchanged with a transport: payload bytes plus a string
//! metadata map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Reserved metadata key carrying the type tag of an encoded payload.
pub const TYPE_META_KEY: &str = "um.s11n.type";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    payload: Vec<u8>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl Envelope {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Inserts or overwrites a metadata entry.
    pub fn put_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put_meta(key, value);
        self
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Type tag stored under [`TYPE_META_KEY`], if any.
    pub fn type_tag(&self) -> Option<&str> {
        self.meta(TYPE_META_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_meta_overwrites_existing_key() {
        let mut envelope = Envelope::new(b"payload".to_vec()).with_meta("corr", "1");
        envelope.put_meta("corr", "2");

        assert_eq!(envelope.meta("corr"), Some("2"));
        assert_eq!(envelope.metadata().len(), 1);
        assert_eq!(envelope.type_tag(), None);
    }

    #[test]
    fn missing_metadata_field_deserializes_as_empty() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"payload":[104,105]}"#).expect("parse envelope");
        assert_eq!(envelope.payload(), b"hi");
        assert!(envelope.metadata().is_empty());
    }
}
