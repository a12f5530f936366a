use crate::errors::LeadGenError;
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry, backoff, timeout and rate limiting applied uniformly to every
/// outbound source request.
///
/// # Behaviour
///
/// - Each attempt first takes a slot from the limiter under the caller's identity.
/// - Each attempt is bounded by `request_timeout`.
/// - Only retryable errors (see [`LeadGenError::is_retryable`]) are retried,
///   up to `max_attempts` attempts in total.
/// - Delays grow as `backoff_base * 2^(attempt - 1)`, capped at `backoff_max`.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub request_timeout: Duration,
    pub limiter: Arc<RateLimiter>,
}

impl FetchPolicy {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            limiter,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max.max(base);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }

    /// Runs `operation` under the policy.
    ///
    /// `identity` selects the rate-limit bucket; `label` is only used in logs.
    pub async fn execute<T, F, Fut>(
        &self,
        identity: &str,
        label: &str,
        mut operation: F,
    ) -> Result<T, LeadGenError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LeadGenError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let decision = self.limiter.acquire(identity);
            let outcome = if decision.is_allowed() {
                match tokio::time::timeout(self.request_timeout, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(LeadGenError::TransientFetch(format!(
                        "{} timed out after {:?}",
                        label, self.request_timeout
                    ))),
                }
            } else {
                Err(LeadGenError::TransientFetch(format!(
                    "{} rate limited for '{}' ({})",
                    label,
                    identity,
                    match decision {
                        RateLimitDecision::DenyHourlyLimit => "hourly limit",
                        _ => "per-minute limit",
                    }
                )))
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(label, attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let mut delay = self.backoff(attempt);
                    if !decision.is_allowed() {
                        delay = delay
                            .max(self.limiter.retry_after(identity))
                            .min(self.backoff_max);
                    }
                    tracing::warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(label, attempts = attempt, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}
