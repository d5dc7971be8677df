//! Bounded retry for upstream round trips.
//!
//! Retries transport failures, timeouts, 5xx and 429 responses. Anything else
//! (4xx, empty geocoding results, parse failures) is returned on first sight.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 250;
pub const DEFAULT_MAX_DELAY_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff: initial_delay * 2^attempt, capped at max_delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

pub fn decision_for_status(status: StatusCode) -> RetryDecision {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDecision::Retry
    } else {
        RetryDecision::NoRetry
    }
}

pub fn decision_for_transport(error: &reqwest::Error) -> RetryDecision {
    if error.is_timeout() || error.is_connect() {
        RetryDecision::Retry
    } else {
        RetryDecision::NoRetry
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy
/// runs out of attempts.
pub async fn retry_async<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, (E, RetryDecision)>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err((error, RetryDecision::Retry)) if attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    "{label} failed ({error}), retrying in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err((error, _)) => return Err(error),
        }
    }
}
