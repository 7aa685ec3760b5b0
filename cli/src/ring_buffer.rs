//! Size-bounded, sequence-numbered buffer of PTY output chunks.
//!
//! Every chunk the child process produces is appended here before it is
//! forwarded anywhere else. When a mobile peer reconnects it tells us the
//! last sequence number it saw, and the channel replays everything newer
//! via [`OutputRingBuffer::get_after`].
//!
//! # Eviction
//!
//! The buffer is bounded by the total byte size of the retained chunks,
//! not by chunk count. Appending evicts from the oldest end until the total
//! fits the capacity again. The chunk being appended is never evicted, so a
//! single chunk larger than the whole capacity is retained on its own until
//! the next append pushes it out.
//!
//! # Data loss
//!
//! A peer that was away long enough for its last-seen chunk to be evicted
//! gets a best-effort replay starting at the oldest retained chunk. The gap
//! is visible to the peer because every chunk carries its sequence number
//! and the replay ends with the current sequence.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::constants::DEFAULT_BUFFER_CAPACITY;

/// Sequence value reported by an empty buffer, and the `last_seq` a peer
/// sends when it has seen nothing yet.
pub const NO_SEQUENCE: i64 = -1;

/// Ring buffer shared between the PTY reader thread (writer) and the
/// channel driver (reader).
pub type SharedRingBuffer = Arc<Mutex<OutputRingBuffer>>;

/// One chunk of PTY output.
///
/// Immutable once created. `data` is reference counted, so handing a chunk
/// to the channel for transmission never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Sequence number, strictly increasing for the session's lifetime.
    pub seq: i64,
    /// Raw output bytes.
    pub data: Bytes,
    /// Wall-clock time of the append, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Size of `data` in bytes.
    pub byte_size: usize,
}

/// Diagnostic snapshot returned by [`OutputRingBuffer::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Number of retained chunks.
    pub items: usize,
    /// Total bytes across retained chunks.
    pub total_bytes: usize,
    /// Configured capacity in bytes.
    pub capacity: usize,
    /// Sequence of the most recent append, or [`NO_SEQUENCE`].
    pub current_seq: i64,
    /// Oldest retained sequence.
    pub oldest_seq: Option<i64>,
    /// Newest retained sequence.
    pub newest_seq: Option<i64>,
}

/// Append-only output store bounded by total byte size.
#[derive(Debug)]
pub struct OutputRingBuffer {
    chunks: VecDeque<OutputChunk>,
    total_bytes: usize,
    capacity: usize,
    next_seq: i64,
}

impl OutputRingBuffer {
    /// Create a buffer holding at most `capacity` bytes of output.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "OutputRingBuffer capacity must be > 0");
        Self {
            chunks: VecDeque::new(),
            total_bytes: 0,
            capacity,
            next_seq: 0,
        }
    }

    /// Create a buffer with [`DEFAULT_BUFFER_CAPACITY`] (100,000 bytes).
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }

    /// Wrap a new buffer for sharing across threads.
    #[must_use]
    pub fn shared(capacity: usize) -> SharedRingBuffer {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Append `data`, assign it the next sequence number, and evict the
    /// oldest chunks until the retained size fits the capacity.
    ///
    /// Returns the stored chunk (a cheap clone).
    pub fn append(&mut self, data: impl Into<Bytes>) -> OutputChunk {
        let data = data.into();
        let chunk = OutputChunk {
            seq: self.next_seq,
            byte_size: data.len(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            data,
        };
        self.next_seq += 1;

        self.total_bytes += chunk.byte_size;
        self.chunks.push_back(chunk.clone());

        // Never evict the chunk we just pushed.
        while self.total_bytes > self.capacity && self.chunks.len() > 1 {
            if let Some(evicted) = self.chunks.pop_front() {
                self.total_bytes -= evicted.byte_size;
                log::trace!(
                    "[Buffer] evicted seq={} ({}B, total={}B)",
                    evicted.seq,
                    evicted.byte_size,
                    self.total_bytes
                );
            }
        }

        chunk
    }

    /// All retained chunks with a sequence number strictly greater than
    /// `seq`, oldest first.
    ///
    /// A `seq` older than the retained window yields the whole window.
    #[must_use]
    pub fn get_after(&self, seq: i64) -> Vec<OutputChunk> {
        // Sequences are gapless inside the window, so the start index is
        // computable without scanning.
        let Some(oldest) = self.chunks.front().map(|c| c.seq) else {
            return Vec::new();
        };
        let skip = if seq < oldest {
            0
        } else {
            usize::try_from(seq - oldest + 1).unwrap_or(usize::MAX)
        };
        self.chunks.iter().skip(skip).cloned().collect()
    }

    /// Sequence number of the most recent append, or [`NO_SEQUENCE`] if
    /// nothing has been appended. Unaffected by eviction.
    #[must_use]
    pub fn current_sequence(&self) -> i64 {
        self.next_seq - 1
    }

    /// Diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            items: self.chunks.len(),
            total_bytes: self.total_bytes,
            capacity: self.capacity,
            current_seq: self.current_sequence(),
            oldest_seq: self.chunks.front().map(|c| c.seq),
            newest_seq: self.chunks.back().map(|c| c.seq),
        }
    }

    /// Number of retained chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True if no chunks are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Configured maximum capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for OutputRingBuffer {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
