use std::thread;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff for a fallible, retryable operation.
///
/// The n-th retry waits `base_delay * 2^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// The last error of an operation that never succeeded.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    /// Policy that retries immediately. Used by tests.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable`
    /// rejects, or `1 + max_retries` attempts are used up.
    pub fn run<T, E, F, R>(&self, mut op: F, is_retryable: R) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempts > self.max_retries || !is_retryable(&error) {
                        return Err(Exhausted { attempts, error });
                    }
                    let delay = self.delay_for(attempts);
                    warn!(
                        "Attempt {attempts}/{} failed: {error}; retrying in {delay:?}",
                        self.max_retries + 1
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(8));
        assert_eq!(policy.delay_for(40), Duration::from_secs(8));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result: Result<&str, _> = RetryPolicy::immediate(3).run(
            || {
                calls += 1;
                if calls < 3 { Err("busy") } else { Ok("done") }
            },
            |_| true,
        );
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), _> = RetryPolicy::immediate(3).run(
            || {
                calls += 1;
                Err("busy")
            },
            |_| true,
        );
        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(exhausted.error, "busy");
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = RetryPolicy::immediate(3).run(
            || {
                calls += 1;
                Err("unauthorized")
            },
            |e| *e != "unauthorized",
        );
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_waits_between_attempts() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(30),
            max_delay: Duration::from_millis(50),
        };
        let mut attempts = Vec::new();
        let start = std::time::Instant::now();
        let result: Result<(), _> = policy.run(
            || {
                attempts.push(std::time::Instant::now());
                Err("busy")
            },
            |_| true,
        );

        assert_eq!(result.unwrap_err().attempts, 3);
        assert!(attempts[0] - start < Duration::from_millis(30));
        // 30ms, then 60ms capped to 50ms.
        assert!(attempts[1] - attempts[0] >= Duration::from_millis(30));
        assert!(attempts[2] - attempts[1] >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(80 + 100));
    }
}
