//! All timers of one channel, in one place.
//!
//! The driver arms and cancels timers by [`TimerKind`]; re-arming replaces
//! the previous deadline. [`TimerSet::fired`] resolves with whichever armed
//! timer expires first and disarms it. [`TimerSet::cancel_all`] is the single
//! sweep performed on close and on terminal failure.

use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use tokio::time::{sleep, Sleep};

/// The channel's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Silence from the server longer than this tears the socket down.
    Heartbeat,
    /// Next reconnection attempt.
    Reconnect,
    /// Restore the local terminal size after the mobile peer left.
    RestoreResize,
    /// Next agent-side `ping`.
    Ping,
}

impl TimerKind {
    /// Every kind, in poll order.
    pub const ALL: [Self; 4] = [Self::Heartbeat, Self::Reconnect, Self::RestoreResize, Self::Ping];

    fn index(self) -> usize {
        match self {
            Self::Heartbeat => 0,
            Self::Reconnect => 1,
            Self::RestoreResize => 2,
            Self::Ping => 3,
        }
    }
}

/// One optional deadline per [`TimerKind`].
#[derive(Debug, Default)]
pub struct TimerSet {
    slots: [Option<Pin<Box<Sleep>>>; 4],
}

impl TimerSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire after `after`, replacing any pending deadline.
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.slots[kind.index()] = Some(Box::pin(sleep(after)));
    }

    /// Disarm `kind`.
    pub fn cancel(&mut self, kind: TimerKind) {
        self.slots[kind.index()] = None;
    }

    /// Disarm everything.
    pub fn cancel_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Whether `kind` is armed.
    #[must_use]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    /// Whether any timer is armed.
    #[must_use]
    pub fn any_armed(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    /// Wait for the next armed timer to expire and disarm it.
    ///
    /// Pending forever while nothing is armed. Cancel-safe.
    pub async fn fired(&mut self) -> TimerKind {
        poll_fn(|cx| {
            for kind in TimerKind::ALL {
                let slot = &mut self.slots[kind.index()];
                if let Some(sleep) = slot.as_mut() {
                    if sleep.as_mut().poll(cx).is_ready() {
                        *slot = None;
                        return Poll::Ready(kind);
                    }
                }
            }
            Poll::Pending
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_earliest_timer_fires_first() {
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::Ping, Duration::from_secs(30));
        timers.arm(TimerKind::Heartbeat, Duration::from_secs(13));

        assert_eq!(timers.fired().await, TimerKind::Heartbeat);
        assert!(!timers.is_armed(TimerKind::Heartbeat));
        assert_eq!(timers.fired().await, TimerKind::Ping);
        assert!(!timers.any_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_deadline() {
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::Heartbeat, Duration::from_secs(1));
        timers.arm(TimerKind::Reconnect, Duration::from_secs(5));
        tokio::time::advance(Duration::from_millis(900)).await;
        timers.arm(TimerKind::Heartbeat, Duration::from_secs(13));

        assert_eq!(timers.fired().await, TimerKind::Reconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_silences_everything() {
        let mut timers = TimerSet::new();
        for kind in TimerKind::ALL {
            timers.arm(kind, Duration::from_millis(10));
        }
        timers.cancel_all();
        assert!(!timers.any_armed());

        let fired = tokio::time::timeout(Duration::from_secs(60), timers.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_fires_immediately() {
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::Reconnect, Duration::ZERO);
        assert_eq!(timers.fired().await, TimerKind::Reconnect);
    }
}
