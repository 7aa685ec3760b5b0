//! Finite-field Diffie-Hellman key agreement.
//!
//! Uses the 2048-bit MODP group 14 from RFC 3526 (generator 2), which the
//! mobile client implements on top of JavaScript `BigInt`. Public values are
//! exchanged as big-endian byte strings left-padded to the group size and
//! base64-encoded.
//!
//! # Flow
//!
//! ```text
//! agent                                   mobile
//!   |  generate_key_pair()                  |
//!   |  -- public key (via pairing API) -->  |
//!   |  <-- pairing_complete{publicKey} ---  |
//!   |  compute_shared_secret()              |
//!   |  derive_symmetric_key() (HKDF-SHA256) |
//! ```
//!
//! [`KeyExchange`] wraps the flow for one session: the keypair lives for the
//! whole session and the derived key is computed at most once.

use std::sync::{Mutex, OnceLock};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::cipher::{SessionKey, KEY_SIZE};
use crate::error::SessionError;

/// RFC 3526 group 14 prime.
const MODP_2048_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

/// Group generator.
pub const GENERATOR: u32 = 2;

/// Encoded size of public values and shared secrets (2048 bits).
pub const GROUP_BYTES: usize = 256;

/// Private exponent size. 256 bits matches the group's security level.
const PRIVATE_EXPONENT_BYTES: usize = 32;

/// HKDF `info` label binding derived keys to this application.
pub const HKDF_INFO: &[u8] = b"termly-session-key";

/// Digest bytes shown in a fingerprint (24 hex characters).
const FINGERPRINT_BYTES: usize = 12;

fn group_prime() -> &'static BigUint {
    static PRIME: OnceLock<BigUint> = OnceLock::new();
    PRIME.get_or_init(|| {
        BigUint::parse_bytes(MODP_2048_PRIME_HEX.as_bytes(), 16)
            .expect("RFC 3526 prime constant is valid hex")
    })
}

fn to_group_bytes(n: &BigUint) -> Vec<u8> {
    let raw = n.to_bytes_be();
    let mut out = vec![0u8; GROUP_BYTES.saturating_sub(raw.len())];
    out.extend_from_slice(&raw);
    out
}

/// Secret exponent. Big-endian bytes, zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    fn exponent(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Public value `g^x mod p`, padded to [`GROUP_BYTES`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Parse and range-check a peer's base64 public value.
    ///
    /// Rejects anything outside `1 < y < p - 1`, which excludes the values
    /// that would force a trivial shared secret.
    pub fn from_base64(encoded: &str) -> Result<Self, SessionError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| SessionError::InvalidPeerKey(format!("not valid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Range-check raw big-endian bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        if bytes.is_empty() {
            return Err(SessionError::InvalidPeerKey("empty public key".into()));
        }
        let value = BigUint::from_bytes_be(bytes);
        let p = group_prime();
        let one = BigUint::from(1u32);
        let p_minus_one = p - &one;

        if value <= one || value >= p_minus_one {
            return Err(SessionError::InvalidPeerKey(
                "public value outside the range 1 < y < p-1".into(),
            ));
        }
        Ok(Self(to_group_bytes(&value)))
    }

    /// Canonical big-endian encoding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64 of the canonical encoding, as sent to the pairing API.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    /// Short human-comparable fingerprint, e.g. `A1:B2:...` (12 groups).
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }

    fn value(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }
}

/// Shared secret `y^x mod p`, padded to [`GROUP_BYTES`] and zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Raw secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// A private exponent and its public value.
#[derive(Debug)]
pub struct KeyPair {
    /// Secret half.
    pub private: PrivateKey,
    /// Shareable half.
    pub public: PublicKey,
}

/// Generate a fresh keypair from the OS-seeded RNG.
#[must_use]
pub fn generate_key_pair() -> KeyPair {
    let mut bytes = vec![0u8; PRIVATE_EXPONENT_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    // Exponents 0 and 1 yield public values the peer rejects.
    if bytes.iter().all(|&b| b == 0) || BigUint::from_bytes_be(&bytes) == BigUint::from(1u32) {
        bytes[PRIVATE_EXPONENT_BYTES - 1] = 2;
    }

    let private = PrivateKey(bytes);
    let y = BigUint::from(GENERATOR).modpow(&private.exponent(), group_prime());
    let public = PublicKey(to_group_bytes(&y));

    KeyPair { private, public }
}

/// Combine our private exponent with the peer's public value.
pub fn compute_shared_secret(
    private: &PrivateKey,
    remote: &PublicKey,
) -> Result<SharedSecret, SessionError> {
    let z = remote.value().modpow(&private.exponent(), group_prime());
    if z <= BigUint::from(1u32) {
        return Err(SessionError::InvalidPeerKey(
            "public value produced a degenerate shared secret".into(),
        ));
    }
    Ok(SharedSecret(to_group_bytes(&z)))
}

/// Derive the 256-bit session key with HKDF-SHA256 (empty salt).
#[must_use]
pub fn derive_symmetric_key(secret: &SharedSecret) -> SessionKey {
    let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    // 32 bytes is far below HKDF-SHA256's 8160-byte output limit.
    hk.expand(HKDF_INFO, &mut okm)
        .expect("32-byte HKDF output is always valid");
    let key = SessionKey::from_bytes(okm);
    okm.zeroize();
    key
}

/// SHA-256 fingerprint of arbitrary key material: first 12 digest bytes as
/// uppercase hex pairs joined by `:`.
#[must_use]
pub fn fingerprint(material: &[u8]) -> String {
    let digest = Sha256::digest(material);
    digest[..FINGERPRINT_BYTES]
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// One session's key agreement.
///
/// Shared by the coordinator (which publishes the public key) and the
/// channel task (which completes pairing). Completion is idempotent: once a
/// key exists, later pairing messages reuse it.
#[derive(Debug)]
pub struct KeyExchange {
    key_pair: KeyPair,
    established: Mutex<Option<Established>>,
}

#[derive(Debug)]
struct Established {
    key: SessionKey,
    peer_fingerprint: String,
}

impl KeyExchange {
    /// Start an exchange with a freshly generated keypair.
    #[must_use]
    pub fn new() -> Self {
        Self::from_key_pair(generate_key_pair())
    }

    /// Start an exchange with an existing keypair.
    #[must_use]
    pub fn from_key_pair(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            established: Mutex::new(None),
        }
    }

    /// Our public value.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public
    }

    /// The session key, once pairing has completed.
    #[must_use]
    pub fn session_key(&self) -> Option<SessionKey> {
        self.established
            .lock()
            .expect("key exchange lock poisoned")
            .as_ref()
            .map(|e| e.key.clone())
    }

    /// Fingerprint of the peer's public key, once pairing has completed.
    #[must_use]
    pub fn peer_fingerprint(&self) -> Option<String> {
        self.established
            .lock()
            .expect("key exchange lock poisoned")
            .as_ref()
            .map(|e| e.peer_fingerprint.clone())
    }

    /// Complete the exchange with the peer's base64 public value.
    ///
    /// Returns the existing key unchanged if the exchange already completed.
    /// On [`SessionError::InvalidPeerKey`] no key is stored and a later,
    /// valid pairing message can still succeed.
    pub fn complete(&self, remote_public_b64: &str) -> Result<SessionKey, SessionError> {
        let mut guard = self.established.lock().expect("key exchange lock poisoned");
        if let Some(existing) = guard.as_ref() {
            log::debug!("[KeyExchange] Pairing repeated; reusing established key");
            return Ok(existing.key.clone());
        }

        let remote = PublicKey::from_base64(remote_public_b64)?;
        let secret = compute_shared_secret(&self.key_pair.private, &remote)?;
        let key = derive_symmetric_key(&secret);
        let peer_fingerprint = remote.fingerprint();

        log::info!("[KeyExchange] Session key established (peer {peer_fingerprint})");
        *guard = Some(Established {
            key: key.clone(),
            peer_fingerprint,
        });
        Ok(key)
    }
}

impl Default for KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}
