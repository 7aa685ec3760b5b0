//! Typed errors for the session transport engine.
//!
//! Each variant maps to one failure class with its own propagation rule:
//!
//! | Variant | Scope | Handling |
//! |---|---|---|
//! | `SpawnFailed` | session start | fatal, non-zero exit |
//! | `ConnectFailed` | initial connect | fatal, non-zero exit |
//! | `AuthenticationFailed` / `DecryptionError` | one message | logged, dropped |
//! | `InvalidPeerKey` | one pairing attempt | pairing aborted, channel stays up |
//! | `SessionInvalidated` | whole session | fatal, distinct exit code |
//!
//! Transient network errors never surface as `SessionError`; they drive the
//! reconnection state machine instead.

use std::path::PathBuf;

/// Failures of the session transport engine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The child process could not be started.
    #[error("failed to spawn `{command}`: {reason}")]
    SpawnFailed {
        /// Executable that failed to launch.
        command: String,
        /// Underlying error text.
        reason: String,
    },

    /// The initial WebSocket connection could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    ConnectFailed {
        /// URL that was dialed (pairing code redacted).
        url: String,
        /// Underlying error text.
        reason: String,
    },

    /// The cipher refused to seal a payload.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// An AEAD tag did not verify.
    #[error("authentication failed: ciphertext or IV was tampered with, or the key is wrong")]
    AuthenticationFailed,

    /// Ciphertext, IV or encoding was malformed.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// The peer's Diffie-Hellman public value was malformed or out of range.
    #[error("invalid peer public key: {0}")]
    InvalidPeerKey(String),

    /// The server declared the session dead; reconnecting cannot help.
    #[error("session invalidated by server ({reason}): {message}")]
    SessionInvalidated {
        /// Machine-readable reason (`session_expired` or `session_not_found`).
        reason: String,
        /// Human-readable server message.
        message: String,
    },

    /// A session is already running for this working directory.
    #[error("a session is already running in {directory} (session {session_id}, pid {pid})")]
    SessionAlreadyRunning {
        /// Working directory.
        directory: PathBuf,
        /// Existing session id.
        session_id: String,
        /// Existing session's process id.
        pid: u32,
    },

    /// The requested working directory is unusable.
    #[error("{0}")]
    InvalidDirectory(String),
}

impl SessionError {
    /// Process exit code for this error when it ends the program.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SessionInvalidated { .. } => 2,
            _ => 1,
        }
    }

    /// True for per-message cryptographic failures that must be dropped
    /// rather than propagated.
    #[must_use]
    pub fn is_per_message(&self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::DecryptionError(_))
    }
}
