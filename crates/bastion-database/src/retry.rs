//! Bounded exponential backoff for connection attempts.

use std::time::Duration;

/// Delay schedule for a fixed number of attempts.
///
/// Attempt `n` (1-based) that fails is followed by a wait of
/// `base * 2^(n-1)`, capped at `max_delay`. No delay follows the last attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    attempt: u32,
    total_delay: Duration,
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            attempt: 0,
            total_delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Sum of all delays handed out so far.
    pub fn total_delay(&self) -> Duration {
        self.total_delay
    }

    /// Start the next attempt. Returns `false` once the budget is spent.
    pub fn start_attempt(&mut self) -> bool {
        if self.attempt >= self.max_attempts {
            return false;
        }
        self.attempt += 1;
        true
    }

    /// Delay to wait after the current attempt failed, or `None` if it was the last.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt == 0 || self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(self.attempt - 1);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        self.total_delay += delay;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(backoff: &mut Backoff) -> Vec<Duration> {
        let mut out = Vec::new();
        while backoff.start_attempt() {
            if let Some(d) = backoff.next_delay() {
                out.push(d);
            }
        }
        out
    }

    #[test]
    fn test_doubling_schedule() {
        let mut backoff = Backoff::new(5, Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(
            delays(&mut backoff),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
        assert_eq!(backoff.attempts(), 5);
        assert_eq!(backoff.total_delay(), Duration::from_secs(15));
    }

    #[test]
    fn test_delay_is_capped() {
        let mut backoff = Backoff::new(6, Duration::from_secs(1), Duration::from_secs(5));
        let schedule = delays(&mut backoff);
        assert_eq!(schedule.last(), Some(&Duration::from_secs(5)));
        assert!(schedule.iter().all(|d| *d <= Duration::from_secs(5)));
    }

    #[test]
    fn test_single_attempt_never_sleeps() {
        let mut backoff = Backoff::new(1, Duration::from_secs(1), Duration::from_secs(5));
        assert!(backoff.start_attempt());
        assert_eq!(backoff.next_delay(), None);
        assert!(!backoff.start_attempt());
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        let backoff = Backoff::new(0, Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(backoff.max_attempts(), 1);
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(64, Duration::from_secs(1), Duration::from_secs(30));
        let schedule = delays(&mut backoff);
        assert_eq!(schedule.len(), 63);
        assert_eq!(schedule[62], Duration::from_secs(30));
    }
}
