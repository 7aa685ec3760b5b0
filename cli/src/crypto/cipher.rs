//! AES-256-GCM payload encryption.
//!
//! Every terminal payload that crosses the relay is sealed here. The relay
//! server only ever sees base64 ciphertext and IVs.
//!
//! # Wire Format
//!
//! ```json
//! { "data": "<base64 ciphertext || 16-byte tag>", "iv": "<base64 12-byte IV>" }
//! ```
//!
//! The tag is appended to the ciphertext, which is the layout the mobile
//! client's WebCrypto implementation produces and expects.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::SessionError;

/// Symmetric key size (256 bits).
pub const KEY_SIZE: usize = 32;

/// IV size for AES-GCM (96 bits = 12 bytes).
pub const IV_SIZE: usize = 12;

/// Authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

/// 256-bit session key derived from the Diffie-Hellman exchange.
///
/// Held in memory only and zeroed on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Ciphertext (tag appended) plus the IV it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Ciphertext followed by the 16-byte authentication tag.
    pub ciphertext: Vec<u8>,
    /// Random IV used for this message only.
    pub iv: [u8; IV_SIZE],
}

/// Base64 form of [`Sealed`] as it appears in JSON messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePayload {
    /// Base64 ciphertext with tag.
    pub data: String,
    /// Base64 IV.
    pub iv: String,
}

fn cipher_for(key: &SessionKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> Result<Sealed, SessionError> {
    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let ciphertext = cipher_for(key)
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| SessionError::EncryptionFailed(e.to_string()))?;

    Ok(Sealed { ciphertext, iv })
}

/// Decrypt and verify `ciphertext` (tag appended) sealed with `iv`.
///
/// Returns the whole plaintext or an error, never a partial result.
pub fn decrypt(ciphertext: &[u8], iv: &[u8], key: &SessionKey) -> Result<Vec<u8>, SessionError> {
    if iv.len() != IV_SIZE {
        return Err(SessionError::DecryptionError(format!(
            "IV must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(SessionError::DecryptionError(format!(
            "ciphertext is {} bytes, shorter than the {TAG_SIZE}-byte tag",
            ciphertext.len()
        )));
    }

    cipher_for(key)
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_aead| SessionError::AuthenticationFailed)
}

/// Encrypt and base64-encode for a JSON message.
pub fn seal_for_wire(plaintext: &[u8], key: &SessionKey) -> Result<WirePayload, SessionError> {
    let sealed = encrypt(plaintext, key)?;
    Ok(WirePayload {
        data: BASE64.encode(&sealed.ciphertext),
        iv: BASE64.encode(sealed.iv),
    })
}

/// Decode and decrypt a base64 `data`/`iv` pair from a JSON message.
pub fn open_from_wire(data: &str, iv: &str, key: &SessionKey) -> Result<Vec<u8>, SessionError> {
    let ciphertext = BASE64
        .decode(data)
        .map_err(|e| SessionError::DecryptionError(format!("invalid ciphertext encoding: {e}")))?;
    let iv = BASE64
        .decode(iv)
        .map_err(|e| SessionError::DecryptionError(format!("invalid IV encoding: {e}")))?;
    decrypt(&ciphertext, &iv, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SessionKey {
        SessionKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = key(42);
        let plaintext = b"Hello, encrypted world!";

        let sealed = encrypt(plaintext, &key).unwrap();
        assert_eq!(sealed.ciphertext.len(), plaintext.len() + TAG_SIZE);

        let opened = decrypt(&sealed.ciphertext, &sealed.iv, &key).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let key = key(1);
        let sealed = encrypt(b"", &key).unwrap();
        assert_eq!(sealed.ciphertext.len(), TAG_SIZE);
        assert!(decrypt(&sealed.ciphertext, &sealed.iv, &key).unwrap().is_empty());
    }

    #[test]
    fn test_multi_megabyte_roundtrip() {
        let key = key(9);
        let plaintext: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let sealed = encrypt(&plaintext, &key).unwrap();
        assert_eq!(decrypt(&sealed.ciphertext, &sealed.iv, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let sealed = encrypt(b"secret", &key(1)).unwrap();
        let err = decrypt(&sealed.ciphertext, &sealed.iv, &key(2)).unwrap_err();
        assert!(matches!(err, SessionError::AuthenticationFailed));
    }

    #[test]
    fn test_flipped_iv_fails_authentication() {
        let key = key(3);
        let mut sealed = encrypt(b"keystroke", &key).unwrap();
        sealed.iv[0] ^= 0x01;
        let err = decrypt(&sealed.ciphertext, &sealed.iv, &key).unwrap_err();
        assert!(matches!(err, SessionError::AuthenticationFailed));
    }

    #[test]
    fn test_any_flipped_ciphertext_bit_fails_authentication() {
        let key = key(4);
        let sealed = encrypt(b"ls -la\r", &key).unwrap();
        for byte in 0..sealed.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = sealed.ciphertext.clone();
                tampered[byte] ^= 1 << bit;
                let err = decrypt(&tampered, &sealed.iv, &key).unwrap_err();
                assert!(matches!(err, SessionError::AuthenticationFailed));
            }
        }
    }

    #[test]
    fn test_every_call_uses_fresh_iv() {
        let key = key(5);
        let a = encrypt(b"same", &key).unwrap();
        let b = encrypt(b"same", &key).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_malformed_input_is_decryption_error() {
        let key = key(6);
        let sealed = encrypt(b"data", &key).unwrap();

        let err = decrypt(&sealed.ciphertext, &sealed.iv[..8], &key).unwrap_err();
        assert!(matches!(err, SessionError::DecryptionError(_)));

        let err = decrypt(&sealed.ciphertext[..4], &sealed.iv, &key).unwrap_err();
        assert!(matches!(err, SessionError::DecryptionError(_)));
    }

    #[test]
    fn test_wire_roundtrip() {
        let key = key(7);
        let wire = seal_for_wire(b"\x1b[31mred\x1b[0m", &key).unwrap();
        assert_eq!(BASE64.decode(&wire.iv).unwrap().len(), IV_SIZE);
        let opened = open_from_wire(&wire.data, &wire.iv, &key).unwrap();
        assert_eq!(opened, b"\x1b[31mred\x1b[0m");
    }

    #[test]
    fn test_wire_bad_base64_is_decryption_error() {
        let err = open_from_wire("!!!not base64", "AAAA", &key(8)).unwrap_err();
        assert!(matches!(err, SessionError::DecryptionError(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        assert_eq!(format!("{:?}", key(0xAB)), "SessionKey(..)");
    }
}
