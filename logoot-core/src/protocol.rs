//! Operation envelope exchanged between replicas.
//!
//! Logical shape (the JSON encoding uses exactly these names):
//! ```text
//! {
//!   "from": "A",
//!   "operation": "insert" | "delete",
//!   "atom": {
//!     "position": [ { "digit": 16383, "siteId": "A" }, ... ],
//!     "char": "h",
//!     "deleted": false
//!   }
//! }
//! ```
//!
//! In-process links move [`Message`] values directly. Byte transports use the
//! bincode encoding ([`Message::encode`] / [`Message::decode`]) or JSON
//! ([`Message::to_json`] / [`Message::from_json`]).

use serde::{Deserialize, Serialize};

use crate::atom::Atom;

/// Kind of operation carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Delete,
}

/// One insert or delete, tagged with the replica that originated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub operation: Operation,
    pub atom: Atom,
}

impl Message {
    pub fn insert(from: impl Into<String>, atom: Atom) -> Self {
        Self {
            from: from.into(),
            operation: Operation::Insert,
            atom,
        }
    }

    pub fn delete(from: impl Into<String>, atom: Atom) -> Self {
        Self {
            from: from.into(),
            operation: Operation::Delete,
            atom,
        }
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Structural checks a receiving replica runs before applying.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.from.is_empty() {
            return Err(ProtocolError::Malformed("empty sender".into()));
        }
        self.atom
            .position
            .validate()
            .map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Malformed message: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{Position, PositionComponent};

    fn sample_atom() -> Atom {
        Atom::new(
            Position::new(vec![
                PositionComponent::new(5, "A"),
                PositionComponent::new(16383, "B"),
            ]),
            'h',
        )
    }

    #[test]
    fn test_binary_roundtrip() {
        let msg = Message::insert("B", sample_atom());
        let encoded = msg.encode().unwrap();
        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_json_field_names() {
        let msg = Message::delete("A", sample_atom());
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["from"], "A");
        assert_eq!(json["operation"], "delete");
        assert_eq!(json["atom"]["char"], "h");
        assert_eq!(json["atom"]["deleted"], false);
        assert_eq!(json["atom"]["position"][1]["digit"], 16383);
        assert_eq!(json["atom"]["position"][1]["siteId"], "B");
    }

    #[test]
    fn test_json_parse_external_envelope() {
        let text = r#"{
            "from": "C",
            "operation": "insert",
            "atom": {"position": [{"digit": 42, "siteId": "C"}], "char": "q", "deleted": false}
        }"#;
        let msg = Message::from_json(text).unwrap();
        assert_eq!(msg.operation, Operation::Insert);
        assert_eq!(msg.atom.ch, 'q');
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let text = r#"{"from": "C", "operation": "move",
            "atom": {"position": [{"digit": 42, "siteId": "C"}], "char": "q", "deleted": false}}"#;
        assert!(matches!(
            Message::from_json(text),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(Message::decode(&garbage).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_position() {
        let msg = Message::insert("A", Atom::new(Position::new(Vec::new()), 'x'));
        assert!(matches!(msg.validate(), Err(ProtocolError::Malformed(_))));

        let msg = Message::insert("", sample_atom());
        assert!(msg.validate().is_err());
    }
}
