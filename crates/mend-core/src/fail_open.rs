//! Best-effort side effects
//!
//! The generation cache file, the phase record and bookkeeping commits are
//! conveniences. When one of them fails the pipeline logs the error with its
//! kind and keeps going with the in-memory state.
//!
//! Diff application, checkpoint restore and sandbox verdicts decide whether a
//! patch survives, so they never go through here.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::Result;

/// How often and how patiently a best-effort operation is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    /// Delay before retry `n` is `backoff * n`
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: usize, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    fn delay(&self, attempt: usize) -> Duration {
        self.backoff.saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// Keep the value of a finished operation, or log why there is none
pub fn fail_open<T>(operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(val) => Some(val),
        Err(e) => {
            warn!(error_kind = e.kind(), "{} failed, continuing without it: {}", operation, e);
            None
        }
    }
}

/// Run `op` until it succeeds or `policy.attempts` runs out
///
/// Only the final failure is logged at `warn`; earlier ones are `debug`.
pub async fn fail_open_retrying<F, Fut, T>(operation: &str, policy: RetryPolicy, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(val) => return Some(val),
            Err(e) if attempt < attempts => {
                debug!(error_kind = e.kind(), "{} attempt {}/{} failed: {}", operation, attempt, attempts, e);
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt += 1;
            }
            Err(e) => return fail_open(operation, Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MendError;
    use std::cell::Cell;

    fn quick(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    #[test]
    fn test_fail_open_keeps_value_or_drops_error() {
        assert_eq!(fail_open("cache", Ok::<_, MendError>(7)), Some(7));
        assert_eq!(
            fail_open::<i32>("cache", Err(MendError::Persistence("disk full".to_string()))),
            None
        );
    }

    #[test]
    fn test_backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retrying_stops_at_first_success() {
        let calls = Cell::new(0);
        let result = fail_open_retrying("phase record", quick(3), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 2 {
                    Err(MendError::Persistence("locked".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Some(2));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_retrying_gives_up_after_attempts() {
        let calls = Cell::new(0);
        let result = fail_open_retrying("phase record", quick(3), || {
            calls.set(calls.get() + 1);
            async { Err::<(), _>(MendError::Persistence("read-only".to_string())) }
        })
        .await;

        assert_eq!(result, None);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Cell::new(0);
        let result = fail_open_retrying("commit", quick(0), || {
            calls.set(calls.get() + 1);
            async { Ok::<_, MendError>(()) }
        })
        .await;

        assert_eq!(result, Some(()));
        assert_eq!(calls.get(), 1);
    }
}
