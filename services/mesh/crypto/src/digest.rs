//! Fingerprints and sender-id hashes (truncated SHA-256).

use crate::keys::IdentityPublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a sender-id hash carried in packet headers
pub const SENDER_HASH_SIZE: usize = 16;

const FINGERPRINT_BYTES: usize = 8;

/// Truncated hash of a node id, used in packet headers instead of the id
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderIdHash(pub [u8; SENDER_HASH_SIZE]);

impl SenderIdHash {
    /// Raw hash bytes
    pub fn as_bytes(&self) -> &[u8; SENDER_HASH_SIZE] {
        &self.0
    }
}

impl fmt::Display for SenderIdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SenderIdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenderIdHash({})", self)
    }
}

/// Hash a node id to its header form
pub fn hash_sender_id(sender_id: &str) -> SenderIdHash {
    let digest = Sha256::digest(sender_id.as_bytes());
    let mut out = [0u8; SENDER_HASH_SIZE];
    out.copy_from_slice(&digest[..SENDER_HASH_SIZE]);
    SenderIdHash(out)
}

/// Human-comparable fingerprint of an identity key, e.g. `1A2B-3C4D-5E6F-7081`
pub fn create_fingerprint(public_key: &IdentityPublicKey) -> String {
    let digest = Sha256::digest(public_key.as_bytes());
    let hex = hex::encode_upper(&digest[..FINGERPRINT_BYTES]);
    hex.as_bytes()
        .chunks(4)
        .filter_map(|group| std::str::from_utf8(group).ok())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IdentityKeyPair;

    #[test]
    fn test_fingerprint_format() {
        let key = IdentityKeyPair::generate().unwrap().public_key();
        let fp = create_fingerprint(&key);
        assert_eq!(fp.len(), 19);
        let groups: Vec<&str> = fp.split('-').collect();
        assert_eq!(groups.len(), 4);
        for group in groups {
            assert_eq!(group.len(), 4);
            assert!(group
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = IdentityKeyPair::generate().unwrap().public_key();
        let b = IdentityKeyPair::generate().unwrap().public_key();
        assert_eq!(create_fingerprint(&a), create_fingerprint(&a));
        assert_ne!(create_fingerprint(&a), create_fingerprint(&b));
    }

    #[test]
    fn test_sender_hash() {
        let a = hash_sender_id("alice");
        assert_eq!(a, hash_sender_id("alice"));
        assert_ne!(a, hash_sender_id("bob"));
        assert_eq!(a.to_string().len(), SENDER_HASH_SIZE * 2);
    }
}
