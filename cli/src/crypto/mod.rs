//! End-to-end encryption between the agent and the paired mobile device.
//!
//! - [`dh`]: group-14 Diffie-Hellman, HKDF-SHA256 key derivation, fingerprints
//! - [`cipher`]: AES-256-GCM sealing of individual payloads
//!
//! Keys never leave process memory and are zeroed on drop.

// Rust guideline compliant 2026-02

pub mod cipher;
pub mod dh;

pub use cipher::{decrypt, encrypt, open_from_wire, seal_for_wire, Sealed, SessionKey, WirePayload};
pub use dh::{
    compute_shared_secret, derive_symmetric_key, fingerprint, generate_key_pair, KeyExchange,
    KeyPair, PublicKey,
};
