use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::retry::{with_retry, LedgerRetryPolicy, RetryConfig, RetryFailure};
use crate::{
    common::TenantScope,
    config::StockJobConfig,
    entities::usage::UsageStatus,
    errors::LedgerResult,
    events::{Event, EventSender},
    metrics,
    services::usage::{UsageRecord, UsageService},
};

/// Applies usage status changes in the background with bounded retries.
///
/// Each attempt is one full transition transaction, so a failed attempt
/// leaves nothing behind. When the budget runs out the usage is flagged
/// with the failure reason and a `StockJobFailed` event goes out.
pub struct UsageStockJob {
    usage: Arc<UsageService>,
    event_sender: Arc<EventSender>,
    retry: RetryConfig,
}

impl UsageStockJob {
    pub fn new(
        usage: Arc<UsageService>,
        event_sender: Arc<EventSender>,
        config: &StockJobConfig,
    ) -> Self {
        Self {
            usage,
            event_sender,
            retry: RetryConfig::from(config),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[instrument(skip(self, scope), fields(tenant_id = %scope.tenant_id()))]
    pub async fn run(
        &self,
        scope: &TenantScope,
        usage_id: Uuid,
        target: UsageStatus,
    ) -> LedgerResult<UsageRecord> {
        let result = with_retry(&self.retry, &LedgerRetryPolicy, || {
            self.usage.transition(scope, usage_id, target)
        })
        .await;

        match result {
            Ok(record) => {
                info!(usage_id = %usage_id, to = %target, "Usage stock job finished");
                Ok(record)
            }
            Err(RetryFailure { attempts, error }) => {
                let reason = error.to_string();
                metrics::STOCK_JOB_FAILURES.inc();
                error!(usage_id = %usage_id, attempts, reason = %reason, "Usage stock job failed");

                let failed_at = match self
                    .usage
                    .mark_transition_failed(scope, usage_id, &reason)
                    .await
                {
                    Ok(usage) => usage.failed_at.unwrap_or_else(Utc::now),
                    Err(e) => {
                        warn!(usage_id = %usage_id, error = %e, "Could not record usage failure");
                        Utc::now()
                    }
                };

                self.event_sender
                    .publish(Event::StockJobFailed {
                        tenant_id: scope.tenant_id(),
                        usage_id,
                        attempts,
                        reason,
                        failed_at,
                    })
                    .await;
                Err(error)
            }
        }
    }

    /// Runs the job on the tokio runtime.
    pub fn spawn(
        self: Arc<Self>,
        scope: TenantScope,
        usage_id: Uuid,
        target: UsageStatus,
    ) -> JoinHandle<LedgerResult<UsageRecord>> {
        tokio::spawn(async move { self.run(&scope, usage_id, target).await })
    }
}
