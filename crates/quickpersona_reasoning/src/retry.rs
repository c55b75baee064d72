//! Retry with exponential backoff for LLM calls.
//!
//! Transient failures (timeouts, network errors, 408/429/5xx) are retried.
//! An [`HttpStatusError`] carrying a client error (400, 401, 403, 404, ...)
//! ends the loop immediately.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first; zero is treated as one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }
}

/// Non-success HTTP status returned by a provider.
#[derive(Debug, thiserror::Error)]
#[error("{provider} API error ({status}): {body}")]
pub struct HttpStatusError {
    pub provider: String,
    pub status: u16,
    pub body: String,
}

impl HttpStatusError {
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, 408 | 429 | 500 | 502 | 503 | 504)
    }
}

fn is_permanent(err: &anyhow::Error) -> bool {
    err.downcast_ref::<HttpStatusError>()
        .is_some_and(|e| !e.is_retryable())
}

/// Run `operation` until it succeeds, fails permanently, or the attempts
/// run out. The closure receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if is_permanent(&e) => return Err(e),
            Err(e) => {
                tracing::warn!("{} failed on attempt {}/{}: {:#}", label, attempt, attempts, e);
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(delay).await;
            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * policy.backoff_factor).min(policy.max_delay.as_secs_f64()),
            );
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("{} failed", label))
        .context(format!("{} failed after {} attempt(s)", label, attempts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let out = with_retry(&fast(3), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    anyhow::bail!("flaky")
                }
                Ok(attempt)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = with_retry(&fast(2), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("down") }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = with_retry(&fast(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(HttpStatusError {
                    provider: "OpenAI".into(),
                    status: 401,
                    body: "bad key".into(),
                }
                .into())
            }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = with_retry(&fast(0), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retryable_statuses() {
        let err = |status| HttpStatusError {
            provider: "x".into(),
            status,
            body: String::new(),
        };
        assert!(err(429).is_retryable());
        assert!(err(503).is_retryable());
        assert!(!err(400).is_retryable());
        assert!(!err(404).is_retryable());
    }
}
