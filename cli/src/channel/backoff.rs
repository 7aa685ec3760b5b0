//! Reconnection budget and backoff schedule.

use std::time::Duration;

use crate::constants::{MAX_RECONNECT_ATTEMPTS, RECONNECT_BACKOFF};

/// How many reconnection attempts are made and how long to wait before each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    schedule: Vec<Duration>,
}

impl ReconnectPolicy {
    /// Policy with a custom attempt budget and delay table.
    ///
    /// Attempt `n` (1-based) waits `schedule[n - 1]`; attempts past the end
    /// of the table reuse its last entry. An empty table means no delay.
    #[must_use]
    pub fn new(max_attempts: u32, schedule: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            schedule,
        }
    }

    /// Attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether attempt number `attempt` (1-based) is within budget.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.schedule
            .get(index)
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(MAX_RECONNECT_ATTEMPTS, RECONNECT_BACKOFF.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|n| policy.delay_for(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![0, 2000, 4000, 8000, 16_000, 16_000, 16_000]);
    }

    #[test]
    fn test_budget() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.allows(0));
        assert!(policy.allows(1));
        assert!(policy.allows(10));
        assert!(!policy.allows(11));
    }

    #[test]
    fn test_zero_budget_allows_nothing() {
        let policy = ReconnectPolicy::new(0, vec![]);
        assert!(!policy.allows(1));
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }
}
