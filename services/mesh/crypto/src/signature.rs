//! Ed25519 detached signatures.

use crate::keys::{IdentityKeyPair, IdentityPublicKey};
use ed25519_dalek::{Signature, Signer, Verifier};

/// Ed25519 signature length in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Sign `data` with the identity's private key
pub fn sign(data: &[u8], identity: &IdentityKeyPair) -> [u8; SIGNATURE_SIZE] {
    identity.signing_key().sign(data).to_bytes()
}

/// Verify a detached signature.
///
/// Returns `false` for malformed keys or signatures rather than an error.
pub fn verify(data: &[u8], signature: &[u8], public_key: &IdentityPublicKey) -> bool {
    let Ok(verifying) = public_key.verifying_key() else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    verifying.verify(data, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let identity = IdentityKeyPair::generate().unwrap();
        let signature = sign(b"prekey", &identity);
        assert!(verify(b"prekey", &signature, &identity.public_key()));
        assert!(!verify(b"prekeY", &signature, &identity.public_key()));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();
        let signature = sign(b"data", &alice);
        assert!(!verify(b"data", &signature, &bob.public_key()));
    }

    #[test]
    fn test_malformed_inputs_return_false() {
        let identity = IdentityKeyPair::generate().unwrap();
        assert!(!verify(b"data", &[0u8; 10], &identity.public_key()));
        assert!(!verify(b"data", &[], &identity.public_key()));

        let signature = sign(b"data", &identity);
        // Not a real identity key, may not even decompress
        let mut bogus = [0u8; 32];
        bogus[0] = 2;
        let bogus = IdentityPublicKey::from_bytes(bogus);
        assert!(!verify(b"data", &signature, &bogus));
    }
}
