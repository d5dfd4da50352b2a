use std::time::Duration;

/// How a connection failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Socket or broker failure worth retrying
    Recoverable,
    /// Failure that must not be retried (rejected credentials)
    Fatal,
}

/// Outcome of consulting a reconnection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Open a fresh transport after this delay
    RetryAfter(Duration),
    /// Stop reconnecting and fail the session
    GiveUp,
}

/// Trait for defining reconnection strategies
///
/// Strategies hold no mutable state. The consecutive failure count is owned by
/// the connection manager and passed in on every call, so a strategy is a pure
/// function of its inputs.
pub trait ReconnectionStrategy: Send + Sync {
    /// Get the delay before the next reconnection attempt
    ///
    /// # Arguments
    /// * `failures` - Consecutive failures so far, including the one being handled (1-based)
    ///
    /// # Returns
    /// * `Some(duration)` - Wait this long before reconnecting
    /// * `None` - Stop reconnecting
    fn next_delay(&self, failures: u32) -> Option<Duration>;

    /// Check if we should continue reconnecting after `failures` consecutive failures
    fn should_reconnect(&self, failures: u32) -> bool;

    /// Decide what to do about a failure
    fn decide(&self, failure: FailureClass, failures: u32) -> ReconnectDecision {
        if failure == FailureClass::Fatal {
            return ReconnectDecision::GiveUp;
        }
        match self.next_delay(failures) {
            Some(delay) => ReconnectDecision::RetryAfter(delay),
            None => ReconnectDecision::GiveUp,
        }
    }
}

/// Fixed delay reconnection strategy
///
/// Always waits the same amount of time between reconnection attempts and
/// gives up once the number of consecutive failures reaches `max_attempts`.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Create a new fixed delay strategy
    ///
    /// # Arguments
    /// * `delay` - The fixed delay between reconnects
    /// * `max_attempts` - Consecutive failures tolerated before giving up (None = unlimited)
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self { delay, max_attempts }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, failures: u32) -> Option<Duration> {
        if !self.should_reconnect(failures) {
            return None;
        }
        Some(self.delay)
    }

    fn should_reconnect(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_gives_up_at_max() {
        let strategy = FixedDelay::new(Duration::from_millis(3000), Some(5));

        for failures in 1..5 {
            assert_eq!(
                strategy.decide(FailureClass::Recoverable, failures),
                ReconnectDecision::RetryAfter(Duration::from_millis(3000))
            );
        }
        assert_eq!(
            strategy.decide(FailureClass::Recoverable, 5),
            ReconnectDecision::GiveUp
        );
    }

    #[test]
    fn test_fatal_never_retries() {
        let strategy = FixedDelay::new(Duration::from_millis(10), None);
        assert_eq!(strategy.decide(FailureClass::Fatal, 1), ReconnectDecision::GiveUp);
        assert_eq!(strategy.decide(FailureClass::Fatal, 0), ReconnectDecision::GiveUp);
    }

    #[test]
    fn test_zero_max_attempts_never_retries() {
        let strategy = FixedDelay::new(Duration::from_millis(10), Some(0));
        assert!(!strategy.should_reconnect(0));
        assert_eq!(
            strategy.decide(FailureClass::Recoverable, 1),
            ReconnectDecision::GiveUp
        );
    }
}
