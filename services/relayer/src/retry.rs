//! Timeout and exponential backoff for ledger and RPC calls.
//!
//! Every attempt runs under the caller's timeout. Only errors the caller
//! classifies as transient are retried; everything else returns at once.

use std::future::Future;
use std::time::Duration;

/// Errors that know whether a retry could help
pub trait Transient {
    fn is_transient(&self) -> bool;

    /// Error reported when an attempt exceeds its deadline
    fn timed_out(after: Duration) -> Self;
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    /// 3 retries at 200ms, 400ms, 800ms; 30s per attempt
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout, ..Self::default() }
    }

    /// Same deadline, no retries
    pub fn once(self) -> Self {
        Self { max_retries: 0, ..self }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt)
    }
}

/// Run `f` until it succeeds, fails permanently, or retries run out
pub async fn retry_transient<T, E, F, Fut>(policy: RetryPolicy, what: &str, f: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_when(policy, what, E::is_transient, f).await
}

/// Like [`retry_transient`] with a custom retry predicate
pub async fn retry_when<T, E, F, Fut, P>(policy: RetryPolicy, what: &str, should_retry: P, f: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    P: Fn(&E) -> bool,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(r) => r,
            Err(_) => Err(E::timed_out(policy.timeout)),
        };

        match result {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && should_retry(&e) => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    "{what} failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
