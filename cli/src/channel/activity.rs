//! Busy/idle tracking for `pong` replies.
//!
//! The mobile app shows whether the AI tool is working. The agent reports
//! `busy` when PTY output was seen within the idle threshold.

use std::time::Duration;

use tokio::time::Instant;

use super::protocol::CliStatus;
use crate::constants::CLI_IDLE_THRESHOLD;

/// Last-output tracker owned by the channel driver.
#[derive(Debug, Clone)]
pub struct CliActivity {
    last_output: Option<Instant>,
    idle_after: Duration,
}

impl CliActivity {
    /// Tracker with a custom idle threshold.
    #[must_use]
    pub fn new(idle_after: Duration) -> Self {
        Self {
            last_output: None,
            idle_after,
        }
    }

    /// Note that the PTY produced output now.
    pub fn record_output(&mut self) {
        self.last_output = Some(Instant::now());
    }

    /// Status as of `now`.
    #[must_use]
    pub fn status_at(&self, now: Instant) -> CliStatus {
        match self.last_output {
            Some(at) if now.saturating_duration_since(at) < self.idle_after => CliStatus::Busy,
            _ => CliStatus::Idle,
        }
    }

    /// Status as of the current instant.
    #[must_use]
    pub fn status(&self) -> CliStatus {
        self.status_at(Instant::now())
    }
}

impl Default for CliActivity {
    fn default() -> Self {
        Self::new(CLI_IDLE_THRESHOLD)
    }
}
