//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::thread;
use std::time::{Duration, SystemTime};

use serde::Deserialize;

use crate::storage::StorageError;

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Base backoff duration for retries.
const BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Maximum backoff duration.
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Errors that know whether replaying the operation could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        self.is_retriable()
    }
}

/// How often and how patiently a failed operation is replayed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: BACKOFF_BASE.as_millis() as u64,
            max_delay_ms: BACKOFF_MAX.as_millis() as u64,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms);
        let cap = Duration::from_millis(self.max_delay_ms);
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = base.saturating_mul(factor).min(cap);
        if self.jitter {
            delay + Duration::from_millis(rand_jitter())
        } else {
            delay
        }
    }

    /// Run `f` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Every attempt calls `f` from scratch, so anything it acquires (locks,
    /// sessions, derived values) is re-acquired on replay. The last error is
    /// returned on exhaustion.
    pub fn run<T, E, F>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable failure, replaying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(operation, attempt, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Jitter for backoff (0-9ms).
fn rand_jitter() -> u64 {
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Flaky(bool);

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    #[test]
    fn test_replays_until_success() {
        let mut calls = 0;
        let result: Result<u32, Flaky> = fast(5).run("op", || {
            calls += 1;
            if calls < 3 {
                Err(Flaky(true))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_stops_at_bound() {
        let mut calls = 0;
        let result: Result<(), Flaky> = fast(4).run("op", || {
            calls += 1;
            Err(Flaky(true))
        });
        assert!(result.is_err());
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_terminal_errors_not_retried() {
        let mut calls = 0;
        let result: Result<(), Flaky> = fast(8).run("op", || {
            calls += 1;
            Err(Flaky(false))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 8,
            base_delay_ms: 10,
            max_delay_ms: 1000,
            jitter: false,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(4), Duration::from_millis(80));
        assert_eq!(policy.backoff(20), Duration::from_millis(1000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_policy_from_json() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 10);
        assert!(policy.jitter);
    }
}
