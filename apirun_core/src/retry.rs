//! Generic retry wrapper the store composes itself around. The retryable-
//! pattern list is configuration on `RetryPolicy` rather than strings
//! hard-coded into each backend, so callers can adapt it to whatever
//! database driver they're running against.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};

use crate::error::Error;
use crate::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            retryable_patterns: DEFAULT_RETRYABLE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Default substring classifier. Fragile by design; callers may pass their
/// own `RetryPolicy` with a different list.
pub const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timeout",
    "deadlock",
    "lock wait timeout",
    "database is locked",
    "broken pipe",
    "connection lost",
    "temporary failure",
];

impl RetryPolicy {
    fn is_retryable(&self, err: &Error) -> bool {
        let msg = err.to_string().to_lowercase();
        self.retryable_patterns.iter().any(|p| msg.contains(&p.to_lowercase()))
    }

    /// Retries `op` with exponential backoff (×2 per attempt, capped at
    /// `max_backoff`) while the error matches the retryable-substring
    /// filter. Context cancellation (signalled via `ErrorKind::Cancellation`)
    /// is never retried.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        let mut backoff = self.initial_backoff;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let cancelled = matches!(err.kind(), crate::error::ErrorKind::Cancellation);
                    if cancelled || attempt >= self.max_retries || !self.is_retryable(&err) {
                        warn!("giving up after {} attempt(s): {}", attempt + 1, err);
                        return Err(err);
                    }
                    attempt += 1;
                    debug!("retrying after error (attempt {}/{}): {}", attempt, self.max_retries, err);
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_on_classified_error_then_succeeds() {
        let policy = RetryPolicy { initial_backoff: Duration::from_millis(1), ..RetryPolicy::default() };
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ErrorKind::Store("connection refused".into()).into())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let policy = RetryPolicy { initial_backoff: Duration::from_millis(1), ..RetryPolicy::default() };
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(ErrorKind::Store("permission denied".into()).into()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_store_error() {
        let policy =
            RetryPolicy { max_retries: 2, initial_backoff: Duration::from_millis(1), ..RetryPolicy::default() };
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(ErrorKind::Store("timeout".into()).into()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }
}
