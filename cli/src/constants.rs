//! Application-wide constants for termly.
//!
//! This module centralizes all magic numbers and timing constants so the
//! channel, bridge and coordinator agree on them. Constants are grouped by
//! domain.
//!
//! # Categories
//!
//! - **Liveness**: heartbeat timeout, pings, idle detection
//! - **Reconnection**: attempt budget and backoff schedule
//! - **Catch-up**: replay batching
//! - **Buffer / PTY**: sizes and delays on the terminal side

use std::time::Duration;

// ============================================================================
// Liveness
// ============================================================================

/// Maximum silence from the server before the connection is considered dead.
///
/// The server pings roughly every 5 seconds, so 13 seconds tolerates two
/// lost pings before tearing the socket down.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(13);

/// Largest heartbeat timeout accepted from configuration.
pub const MAX_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Multiplier applied to [`HEARTBEAT_TIMEOUT`] right after a (re)connect.
pub const HEARTBEAT_GRACE_FACTOR: u32 = 2;

/// Interval between agent-originated `ping` messages.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// No PTY output for this long means the AI tool is idle.
pub const CLI_IDLE_THRESHOLD: Duration = Duration::from_secs(15);

/// Upper bound on a single WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Reconnection
// ============================================================================

/// Reconnection attempts before mirroring is given up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Backoff delays indexed by attempt number minus one. Attempts past the end
/// of the table reuse the last entry.
pub const RECONNECT_BACKOFF: [Duration; 5] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
];

// ============================================================================
// Catch-up
// ============================================================================

/// Chunks per `catchup_batch` message.
pub const CATCHUP_BATCH_SIZE: usize = 100;

/// Pause between consecutive catch-up batches.
pub const CATCHUP_BATCH_DELAY: Duration = Duration::from_millis(50);

// ============================================================================
// Buffer / PTY
// ============================================================================

/// Default output ring buffer capacity in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100_000;

/// Delay before the local terminal size is restored after the mobile peer
/// disconnects. A reconnect within this window cancels the restore.
pub const RESTORE_RESIZE_DELAY: Duration = Duration::from_secs(2);

/// How long the exit watcher waits for the reader to drain trailing output
/// before reporting the exit.
pub const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Fallback terminal size when the local terminal cannot be queried.
pub const DEFAULT_TERMINAL_SIZE: (u16, u16) = (80, 24);

/// Minimum accepted peer resize, in columns.
pub const MIN_PEER_COLS: u16 = 10;

/// Minimum accepted peer resize, in rows.
pub const MIN_PEER_ROWS: u16 = 3;

/// Grace period between SIGTERM and SIGKILL when stopping a session.
pub const GRACEFUL_KILL_TIMEOUT: Duration = Duration::from_secs(5);
