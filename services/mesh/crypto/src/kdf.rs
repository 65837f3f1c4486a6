//! HKDF-SHA256 helpers.

use crate::error::CryptoError;
use crate::keys::{SymmetricKey, KEY_SIZE};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Derive one 32-byte key from input keying material
pub fn derive_key(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, &mut okm[..]).map_err(|_| CryptoError::Kdf)?;
    Ok(SymmetricKey::from_bytes(*okm))
}

/// Derive two independent 32-byte keys from one expansion
pub fn derive_key_pair(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<(SymmetricKey, SymmetricKey), CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE * 2]);
    hkdf.expand(info, &mut okm[..]).map_err(|_| CryptoError::Kdf)?;

    let mut first = [0u8; KEY_SIZE];
    let mut second = [0u8; KEY_SIZE];
    first.copy_from_slice(&okm[..KEY_SIZE]);
    second.copy_from_slice(&okm[KEY_SIZE..]);
    Ok((SymmetricKey::from_bytes(first), SymmetricKey::from_bytes(second)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_separates_outputs() {
        let a = derive_key(b"ikm", None, b"one").unwrap();
        let b = derive_key(b"ikm", None, b"two").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_pair_halves_differ() {
        let (a, b) = derive_key_pair(b"chain", Some(b"salt"), b"step").unwrap();
        assert_ne!(a, b);
        let (a2, b2) = derive_key_pair(b"chain", Some(b"salt"), b"step").unwrap();
        assert_eq!(a, a2);
        assert_eq!(b, b2);
    }
}
