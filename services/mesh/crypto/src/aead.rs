//! ChaCha20-Poly1305 authenticated encryption with detached tags.

use crate::error::CryptoError;
use crate::keys::SymmetricKey;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

/// AEAD nonce length in bytes
pub const NONCE_SIZE: usize = 12;

/// AEAD authentication tag length in bytes
pub const TAG_SIZE: usize = 16;

/// Ciphertext with its detached authentication tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Encrypted bytes, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// Poly1305 tag over ciphertext and associated data
    pub auth_tag: [u8; TAG_SIZE],
}

/// Generate `length` random bytes from the operating system RNG
pub fn generate_nonce(length: usize) -> Result<Vec<u8>, CryptoError> {
    generate_nonce_with(&mut OsRng, length)
}

/// Generate `length` random bytes from the given RNG
pub fn generate_nonce_with<R: RngCore + CryptoRng>(
    rng: &mut R,
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = vec![0u8; length];
    rng.try_fill_bytes(&mut nonce)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    Ok(nonce)
}

/// Encrypt with no associated data
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey, nonce: &[u8]) -> Result<Sealed, CryptoError> {
    encrypt_with_aad(plaintext, key, nonce, &[])
}

/// Encrypt and bind `aad` into the tag
pub fn encrypt_with_aad(
    plaintext: &[u8],
    key: &SymmetricKey,
    nonce: &[u8],
    aad: &[u8],
) -> Result<Sealed, CryptoError> {
    let nonce = check_nonce(nonce)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut ciphertext = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, aad, &mut ciphertext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut auth_tag = [0u8; TAG_SIZE];
    auth_tag.copy_from_slice(tag.as_slice());
    Ok(Sealed {
        ciphertext,
        auth_tag,
    })
}

/// Decrypt with no associated data
pub fn decrypt(
    ciphertext: &[u8],
    auth_tag: &[u8],
    key: &SymmetricKey,
    nonce: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    decrypt_with_aad(ciphertext, auth_tag, key, nonce, &[])
}

/// Decrypt and verify the tag over ciphertext and `aad`.
///
/// Any mismatch (tag, key, nonce, associated data) yields
/// [`CryptoError::Authentication`] and no plaintext.
pub fn decrypt_with_aad(
    ciphertext: &[u8],
    auth_tag: &[u8],
    key: &SymmetricKey,
    nonce: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let nonce = check_nonce(nonce)?;
    if auth_tag.len() != TAG_SIZE {
        return Err(CryptoError::Authentication);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut plaintext = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(nonce, aad, &mut plaintext, Tag::from_slice(auth_tag))
        .map_err(|_| CryptoError::Authentication)?;
    Ok(plaintext)
}

fn check_nonce(nonce: &[u8]) -> Result<&Nonce, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonce(nonce.len()));
    }
    Ok(Nonce::from_slice(nonce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_round_trip() {
        let k = key(1);
        let nonce = generate_nonce(NONCE_SIZE).unwrap();
        let sealed = encrypt(b"light the candle", &k, &nonce).unwrap();
        assert_eq!(sealed.ciphertext.len(), 16);
        assert_ne!(sealed.ciphertext, b"light the candle");

        let plain = decrypt(&sealed.ciphertext, &sealed.auth_tag, &k, &nonce).unwrap();
        assert_eq!(plain, b"light the candle");
    }

    #[test]
    fn test_empty_plaintext() {
        let k = key(2);
        let nonce = generate_nonce(NONCE_SIZE).unwrap();
        let sealed = encrypt(b"", &k, &nonce).unwrap();
        assert!(sealed.ciphertext.is_empty());
        assert!(decrypt(&sealed.ciphertext, &sealed.auth_tag, &k, &nonce)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_tampering_fails_authentication() {
        let k = key(3);
        let nonce = generate_nonce(NONCE_SIZE).unwrap();
        let sealed = encrypt(b"payload", &k, &nonce).unwrap();

        let mut flipped = sealed.ciphertext.clone();
        flipped[0] ^= 0x01;
        assert_eq!(
            decrypt(&flipped, &sealed.auth_tag, &k, &nonce),
            Err(CryptoError::Authentication)
        );

        let mut bad_tag = sealed.auth_tag;
        bad_tag[15] ^= 0x80;
        assert_eq!(
            decrypt(&sealed.ciphertext, &bad_tag, &k, &nonce),
            Err(CryptoError::Authentication)
        );

        assert_eq!(
            decrypt(&sealed.ciphertext, &sealed.auth_tag, &key(4), &nonce),
            Err(CryptoError::Authentication)
        );

        let other_nonce = generate_nonce(NONCE_SIZE).unwrap();
        assert_eq!(
            decrypt(&sealed.ciphertext, &sealed.auth_tag, &k, &other_nonce),
            Err(CryptoError::Authentication)
        );
    }

    #[test]
    fn test_aad_is_bound() {
        let k = key(5);
        let nonce = generate_nonce(NONCE_SIZE).unwrap();
        let sealed = encrypt_with_aad(b"payload", &k, &nonce, b"header-a").unwrap();

        assert!(decrypt_with_aad(&sealed.ciphertext, &sealed.auth_tag, &k, &nonce, b"header-a").is_ok());
        assert_eq!(
            decrypt_with_aad(&sealed.ciphertext, &sealed.auth_tag, &k, &nonce, b"header-b"),
            Err(CryptoError::Authentication)
        );
    }

    #[test]
    fn test_nonce_length_checked() {
        let k = key(6);
        assert_eq!(
            encrypt(b"x", &k, &[0u8; 24]),
            Err(CryptoError::InvalidNonce(24))
        );
        assert_eq!(
            decrypt(b"x", &[0u8; TAG_SIZE], &k, &[0u8; 8]),
            Err(CryptoError::InvalidNonce(8))
        );
    }

    #[test]
    fn test_nonce_generation() {
        assert_eq!(generate_nonce(24).unwrap().len(), 24);
        assert!(generate_nonce(0).unwrap().is_empty());
        assert_ne!(generate_nonce(NONCE_SIZE).unwrap(), generate_nonce(NONCE_SIZE).unwrap());

        let a = generate_nonce_with(&mut StdRng::seed_from_u64(1), NONCE_SIZE).unwrap();
        let b = generate_nonce_with(&mut StdRng::seed_from_u64(1), NONCE_SIZE).unwrap();
        assert_eq!(a, b);
    }
}
