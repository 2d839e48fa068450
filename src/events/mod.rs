use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::{rollback::RollbackType, stock_lot::ItemType, usage::UsageStatus};

/// Balance movement of one (owner, item, type) caused by a committed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub owner_id: Uuid,
    pub item_id: Uuid,
    pub item_type: ItemType,
    pub before: Decimal,
    pub after: Decimal,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes after commit. Delivery failures are logged and never undo the
    /// ledger change that produced the event.
    pub async fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Failed to publish ledger event");
            crate::metrics::EVENTS_DROPPED.inc();
        }
    }
}

/// Outbound notifications emitted once a ledger transaction has committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StockReceived {
        tenant_id: Uuid,
        lot_id: Uuid,
        change: BalanceChange,
    },
    ReceiptCancelled {
        tenant_id: Uuid,
        lot_id: Uuid,
        change: BalanceChange,
    },
    MutationCommitted {
        tenant_id: Uuid,
        mutation_id: Uuid,
        source_owner_id: Uuid,
        destination_owner_id: Uuid,
        changes: Vec<BalanceChange>,
    },
    UsageStatusChanged {
        tenant_id: Uuid,
        usage_id: Uuid,
        from: UsageStatus,
        to: UsageStatus,
        changes: Vec<BalanceChange>,
    },
    RollbackPerformed {
        tenant_id: Uuid,
        rollback_id: Uuid,
        rollback_type: RollbackType,
        target_id: Uuid,
        changes: Vec<BalanceChange>,
    },
    StockJobFailed {
        tenant_id: Uuid,
        usage_id: Uuid,
        attempts: u32,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StockReceived { .. } => "stock_received",
            Event::ReceiptCancelled { .. } => "receipt_cancelled",
            Event::MutationCommitted { .. } => "mutation_committed",
            Event::UsageStatusChanged { .. } => "usage_status_changed",
            Event::RollbackPerformed { .. } => "rollback_performed",
            Event::StockJobFailed { .. } => "stock_job_failed",
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        match self {
            Event::StockReceived { tenant_id, .. }
            | Event::ReceiptCancelled { tenant_id, .. }
            | Event::MutationCommitted { tenant_id, .. }
            | Event::UsageStatusChanged { tenant_id, .. }
            | Event::RollbackPerformed { tenant_id, .. }
            | Event::StockJobFailed { tenant_id, .. } => *tenant_id,
        }
    }
}

/// Downstream consumer of ledger events (reporting, notifications).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the event channel, handing each event to every handler.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockJobFailed {
                usage_id,
                attempts,
                reason,
                ..
            } => {
                error!(
                    usage_id = %usage_id,
                    attempts = attempts,
                    reason = %reason,
                    "Usage stock job exhausted its retries"
                );
            }
            other => {
                info!(event = other.name(), tenant_id = %other.tenant_id(), "Ledger event");
            }
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(event = event.name(), error = %e, "Event handler failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle_event(&self, _event: &Event) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn failed(tenant_id: Uuid) -> Event {
        Event::StockJobFailed {
            tenant_id,
            usage_id: Uuid::new_v4(),
            attempts: 3,
            reason: "connection reset".into(),
            failed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn handlers_see_every_event() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let counting = Arc::new(Counting(AtomicUsize::new(0)));

        sender.publish(failed(Uuid::new_v4())).await;
        sender.publish(failed(Uuid::new_v4())).await;
        drop(sender);

        process_events(rx, vec![counting.clone() as Arc<dyn EventHandler>]).await;
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn publish_to_closed_channel_does_not_fail() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.publish(failed(Uuid::nil())).await;
        assert!(sender.send(failed(Uuid::nil())).await.is_err());
    }

    #[test]
    fn events_expose_tenant() {
        let tenant = Uuid::new_v4();
        let event = failed(tenant);
        assert_eq!(event.tenant_id(), tenant);
        assert_eq!(event.name(), "stock_job_failed");
    }
}
