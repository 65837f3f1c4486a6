//! Application payload carried inside encrypted packets.
//!
//! The mesh treats the payload as opaque apart from size and sanity bounds.
//! Field keys are single letters so that the CBOR encoding stays small enough
//! for a handshake packet to fit the long-range bridge.

use crate::error::WireError;
use serde::{Deserialize, Serialize};

/// Maximum note length in bytes
pub const MAX_NOTE_BYTES: usize = 96;

/// Intent-bearing message exchanged between contacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMessage {
    /// Symbols expressing the intent; at least one
    #[serde(rename = "s")]
    pub sigils: Vec<String>,
    /// Strength of intent in `[0, 1]`
    #[serde(rename = "i")]
    pub intent_strength: f32,
    /// Short free-text note
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Circle the message is addressed to
    #[serde(rename = "g", default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Lifetime in seconds
    #[serde(rename = "t")]
    pub ttl: u32,
    /// Remaining hops the message may travel
    #[serde(rename = "h")]
    pub hop_limit: u8,
}

impl MeshMessage {
    /// Message with the given sigils and intent, default ttl and hop limit
    pub fn new(sigils: Vec<String>, intent_strength: f32) -> Self {
        Self {
            sigils,
            intent_strength,
            note: None,
            group_id: None,
            ttl: 3600,
            hop_limit: 3,
        }
    }

    /// Attach a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Address to a circle
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Check payload bounds
    pub fn validate(&self) -> Result<(), WireError> {
        if self.sigils.is_empty() {
            return Err(WireError::Payload("at least one sigil required".into()));
        }
        if !(0.0..=1.0).contains(&self.intent_strength) {
            return Err(WireError::Payload(format!(
                "intent strength {} outside [0, 1]",
                self.intent_strength
            )));
        }
        if let Some(ref note) = self.note {
            if note.len() > MAX_NOTE_BYTES {
                return Err(WireError::Payload(format!(
                    "note is {} bytes, limit {}",
                    note.len(),
                    MAX_NOTE_BYTES
                )));
            }
        }
        if self.hop_limit == 0 {
            return Err(WireError::Payload("hop limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Encode as CBOR
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| WireError::Payload(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR and check bounds
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let message: Self =
            ciborium::from_reader(bytes).map_err(|e| WireError::Payload(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let message = MeshMessage::new(vec!["☉".into(), "☽".into()], 0.8)
            .with_note("for the morning circle")
            .with_group("circle-7");
        let bytes = message.encode().unwrap();
        assert_eq!(MeshMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_encoding_is_compact() {
        let message = MeshMessage::new(vec!["☉".into()], 0.8);
        let bytes = message.encode().unwrap();
        assert!(bytes.len() < 32, "encoded to {} bytes", bytes.len());
    }

    #[test]
    fn test_validation_bounds() {
        assert!(MeshMessage::new(vec![], 0.5).validate().is_err());
        assert!(MeshMessage::new(vec!["☉".into()], 1.5).validate().is_err());
        assert!(MeshMessage::new(vec!["☉".into()], -0.1).validate().is_err());
        assert!(MeshMessage::new(vec!["☉".into()], f32::NAN).validate().is_err());
        assert!(MeshMessage::new(vec!["☉".into()], 0.0).validate().is_ok());
        assert!(MeshMessage::new(vec!["☉".into()], 1.0).validate().is_ok());

        let at_limit = MeshMessage::new(vec!["☉".into()], 0.5).with_note("a".repeat(MAX_NOTE_BYTES));
        assert!(at_limit.validate().is_ok());
        let too_long = MeshMessage::new(vec!["☉".into()], 0.5).with_note("a".repeat(MAX_NOTE_BYTES + 1));
        assert!(too_long.validate().is_err());

        let mut no_hops = MeshMessage::new(vec!["☉".into()], 0.5);
        no_hops.hop_limit = 0;
        assert!(no_hops.validate().is_err());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(MeshMessage::decode(&[0xFF, 0x00, 0x13]).is_err());
    }
}
