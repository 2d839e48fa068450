use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::StockJobConfig;
use crate::errors::ServiceError;
use crate::metrics;

/// Attempt budget and delay schedule for a background job.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before retry n; the last entry repeats
    pub backoff: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&StockJobConfig::default())
    }
}

impl From<&StockJobConfig> for RetryConfig {
    fn from(config: &StockJobConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
        }
    }
}

impl RetryConfig {
    /// Retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Vec::new(),
        }
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let index = retry.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Decides whether a failed attempt is worth repeating.
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries connection-level failures only; business errors are final.
pub struct LedgerRetryPolicy;

impl RetryPolicy<ServiceError> for LedgerRetryPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_retryable()
    }
}

/// The last error plus how many attempts were made.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

/// Execute an async operation with retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: &impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(attempts, "Operation succeeded after retrying");
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    warn!(attempts, error = %error, "Operation failed, giving up");
                    return Err(RetryFailure { attempts, error });
                }

                let delay = config.delay_for(attempts);
                warn!(attempts, error = %error, ?delay, "Attempt failed, retrying");
                metrics::STOCK_JOB_RETRIES.inc();
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DbErr;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn connection_lost() -> ServiceError {
        ServiceError::DatabaseError(DbErr::Conn(sea_orm::RuntimeErr::Internal(
            "connection reset".to_string(),
        )))
    }

    #[test]
    fn backoff_repeats_last_delay() {
        let config = RetryConfig::from(&StockJobConfig::default());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.delay_for(1), Duration::from_secs(10));
        assert_eq!(config.delay_for(2), Duration::from_secs(30));
        assert_eq!(config.delay_for(3), Duration::from_secs(60));
        assert_eq!(config.delay_for(7), Duration::from_secs(60));
        assert_eq!(RetryConfig::immediate(2).delay_for(1), Duration::ZERO);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_budget_is_spent() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryConfig::immediate(3), &LedgerRetryPolicy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(connection_lost()) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryConfig::immediate(3), &LedgerRetryPolicy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::ValidationError("bad".to_string())) }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_a_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::immediate(3), &LedgerRetryPolicy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(connection_lost())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }
}
