//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Delay before the first liveness re-check.
pub const POLL_BASE_MS: u64 = 100;

/// Upper bound for a single wait between liveness checks.
pub const POLL_MAX_MS: u64 = 1000;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Iterator over successive poll delays, clamped so the sum never passes `budget`.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    attempt: u32,
    base_ms: u64,
    max_ms: u64,
    remaining: Duration,
}

impl PollSchedule {
    pub fn new(budget: Duration) -> Self {
        Self::with_bounds(budget, POLL_BASE_MS, POLL_MAX_MS)
    }

    pub fn with_bounds(budget: Duration, base_ms: u64, max_ms: u64) -> Self {
        Self {
            attempt: 0,
            base_ms,
            max_ms,
            remaining: budget,
        }
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for PollSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining.is_zero() {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);
        let delay = calculate_backoff(self.attempt, self.base_ms, self.max_ms).min(self.remaining);
        self.remaining -= delay;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000);
        assert!(max.as_millis() < 1100);
    }

    #[test]
    fn schedule_stays_within_budget() {
        let budget = Duration::from_millis(2500);
        let total: Duration = PollSchedule::new(budget).sum();
        assert_eq!(total, budget);
    }

    #[test]
    fn empty_budget_yields_nothing() {
        let mut schedule = PollSchedule::new(Duration::ZERO);
        assert_eq!(schedule.next(), None);
        assert_eq!(schedule.attempts(), 0);
    }
}
