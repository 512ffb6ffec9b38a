//! Backoff policy for automatic reconnects.

use std::time::Duration;

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub base_delay: Duration,
    /// Attempts allowed before giving up
    pub max_attempts: u32,
    /// Upper bound on any single delay (`None` = uncapped)
    pub max_delay: Option<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            max_delay: Some(Duration::from_secs(30)),
        }
    }
}

/// Exponential backoff with an attempt ceiling.
///
/// Attempts are numbered from 1. The counter is owned by whoever drives the
/// policy; it goes back to zero on every successful open.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// `base_delay * 2^(attempt - 1)`, clamped to `max_delay` when set.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.config.base_delay.saturating_mul(1u32 << exponent);
        match self.config.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_attempts
    }

    /// Attempts made since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Count one more attempt and return its number.
    pub fn advance(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uncapped(base_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            base_delay: Duration::from_millis(base_ms),
            max_attempts: 5,
            max_delay: None,
        })
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = uncapped(250);
        for attempt in 1..=12u32 {
            assert_eq!(
                policy.next_delay(attempt),
                Duration::from_millis(250 * 2u64.pow(attempt - 1))
            );
        }
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut policy = uncapped(100);
        policy.advance();
        policy.advance();
        let third = policy.advance();
        assert_eq!(policy.next_delay(third), Duration::from_millis(400));

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        let next = policy.advance();
        assert_eq!(next, 1);
        assert_eq!(policy.next_delay(next), policy.next_delay(1));
    }

    #[test]
    fn retry_ceiling() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(!policy.should_retry(6));
    }

    #[test]
    fn default_cap_applies() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.next_delay(5), Duration::from_secs(16));
        assert_eq!(policy.next_delay(6), Duration::from_secs(30));
        assert_eq!(policy.next_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn huge_attempts_saturate() {
        let policy = uncapped(1000);
        assert_eq!(policy.next_delay(u32::MAX), policy.next_delay(32));
        assert!(policy.next_delay(64) >= Duration::from_secs(1 << 31));
    }
}
