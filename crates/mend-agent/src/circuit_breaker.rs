//! Circuit breaker for the generation service
//!
//! After repeated failures the breaker opens and queries fail fast with
//! `ApiLimit` instead of waiting out another timeout. The reflection loop
//! then simply produces no proposal until the cool-down elapses.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Too many failures - reject requests immediately
    Open,
    /// Cool-down elapsed - allow a probe request
    HalfOpen,
}

/// Failure counter with a cool-down window
///
/// ```
/// use mend_agent::CircuitBreaker;
///
/// let cb = CircuitBreaker::new(2, 60);
/// cb.record_failure();
/// cb.record_failure();
/// assert!(!cb.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    last_failure_ms: AtomicU64,
    threshold: u32,
    cool_down: Duration,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl CircuitBreaker {
    /// * `threshold` - consecutive failures before the circuit opens
    /// * `cool_down_secs` - seconds before a probe request is let through
    pub fn new(threshold: u32, cool_down_secs: u64) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            threshold: threshold.max(1),
            cool_down: Duration::from_secs(cool_down_secs),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            return CircuitState::Closed;
        }

        if self.elapsed_since_failure() >= self.cool_down.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    fn elapsed_since_failure(&self) -> u64 {
        now_millis().saturating_sub(self.last_failure_ms.load(Ordering::Relaxed))
    }

    /// Record a successful call (resets failure count)
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    /// Record a failed call, returning the new consecutive failure count
    pub fn record_failure(&self) -> u32 {
        self.last_failure_ms.store(now_millis(), Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// `false` only while the circuit is open
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Milliseconds until a probe is allowed, 0 if not open
    pub fn time_until_retry(&self) -> u64 {
        match self.state() {
            CircuitState::Open => {
                (self.cool_down.as_millis() as u64).saturating_sub(self.elapsed_since_failure())
            }
            CircuitState::Closed | CircuitState::HalfOpen => 0,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_initial_state_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.time_until_retry(), 0);
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new(3, 60);

        assert_eq!(cb.record_failure(), 1);
        assert_eq!(cb.record_failure(), 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.record_failure(), 3);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert!(cb.time_until_retry() > 0);
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::new(3, 60);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cool_down() {
        let cb = CircuitBreaker::new(1, 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        sleep(Duration::from_millis(1100));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let cb = CircuitBreaker::new(0, 60);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
