//! Events emitted by the terminal process bridge.
//!
//! The bridge's reader and exit-watcher threads push these into an
//! unbounded `tokio::sync::mpsc` channel. The session coordinator is the
//! single consumer and forwards output to the channel manager.
//!
//! # Event Types
//!
//! - [`PtyEvent::Output`] - A chunk that was just appended to the ring buffer
//! - [`PtyEvent::Exited`] - The child process terminated (sent exactly once)

// Rust guideline compliant 2026-02

use crate::ring_buffer::OutputChunk;

/// Events emitted by a [`PtyBridge`](super::PtyBridge).
#[derive(Debug, Clone)]
pub enum PtyEvent {
    /// Output chunk, already sequenced by the ring buffer.
    ///
    /// Only delivered while the bridge's forward gate is open.
    Output(OutputChunk),

    /// Child process exited. No further events follow.
    Exited {
        /// Exit code reported by the OS.
        exit_code: i32,
    },
}

impl PtyEvent {
    /// Create an output event.
    #[must_use]
    pub fn output(chunk: OutputChunk) -> Self {
        Self::Output(chunk)
    }

    /// Create an exit event.
    #[must_use]
    pub fn exited(exit_code: i32) -> Self {
        Self::Exited { exit_code }
    }

    /// Check if this is an output event.
    #[must_use]
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output(_))
    }

    /// Check if this is an exit event.
    #[must_use]
    pub fn is_exited(&self) -> bool {
        matches!(self, Self::Exited { .. })
    }
}
