use crate::{
    common::TenantScope,
    db::{transaction, DbPool},
    entities::stock_lot::{self, ItemType, LotSource},
    errors::{LedgerResult, ServiceError},
    events::{Event, EventSender},
    services::{
        collaborators::{to_base_quantity, OwnerDirectory, UnitConverter},
        ledger::{find_lot, Booking, LedgerService},
    },
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Inbound stock for one owner, e.g. a purchase delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub owner_id: Uuid,
    pub item_id: Uuid,
    pub item_type: ItemType,
    pub unit_id: Uuid,
    pub quantity: Decimal,
    pub acquired_on: NaiveDate,
    pub source: LotSource,
    /// Purchase document the lot came from, if any
    pub source_id: Option<Uuid>,
}

pub struct ReceivingService {
    db_pool: Arc<DbPool>,
    ledger: LedgerService,
    converter: Arc<dyn UnitConverter>,
    owners: Arc<dyn OwnerDirectory>,
    event_sender: Arc<EventSender>,
}

impl ReceivingService {
    pub fn new(
        db_pool: Arc<DbPool>,
        ledger: LedgerService,
        converter: Arc<dyn UnitConverter>,
        owners: Arc<dyn OwnerDirectory>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db_pool,
            ledger,
            converter,
            owners,
            event_sender,
        }
    }

    /// Books a new lot for the owner and credits its balance.
    #[instrument(skip(self, scope, request), fields(tenant_id = %scope.tenant_id(), owner_id = %request.owner_id, item_id = %request.item_id))]
    pub async fn receive(
        &self,
        scope: &TenantScope,
        request: ReceiveStock,
    ) -> LedgerResult<stock_lot::Model> {
        if request.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Received quantity must be positive, got {}",
                request.quantity
            )));
        }
        if request.source == LotSource::MutationCredit {
            return Err(ServiceError::ValidationError(
                "Mutation credits are created by stock mutations only".to_string(),
            ));
        }
        if !self.owners.owner_exists(scope, request.owner_id).await? {
            return Err(ServiceError::InvalidOwner(format!(
                "Owner {} does not exist",
                request.owner_id
            )));
        }
        let quantity = to_base_quantity(
            self.converter.as_ref(),
            request.item_id,
            request.unit_id,
            request.quantity,
        )
        .await?;

        let key = scope.key(request.owner_id, request.item_id, request.item_type);
        let txn = transaction::begin(self.db_pool.as_ref()).await?;
        let result = async {
            let outcome = self
                .ledger
                .book(
                    &txn,
                    key,
                    quantity,
                    Booking::In {
                        acquired_on: request.acquired_on,
                        source: request.source,
                        source_id: request.source_id,
                    },
                )
                .await?;
            let lot_id = outcome
                .postings
                .first()
                .map(|p| p.lot_id)
                .ok_or_else(|| ServiceError::integrity("inbound booking produced no lot"))?;
            let lot = find_lot(&txn, scope, lot_id, false).await?;
            Ok::<_, ServiceError>((lot, outcome))
        }
        .await;
        let (lot, outcome) = transaction::finish(txn, result).await?;

        info!(lot_id = %lot.id, quantity = %quantity, "Stock received");
        self.event_sender
            .publish(Event::StockReceived {
                tenant_id: scope.tenant_id(),
                lot_id: lot.id,
                change: outcome.change(),
            })
            .await;

        Ok(lot)
    }

    /// Removes a received lot that nothing has consumed yet.
    #[instrument(skip(self, scope), fields(tenant_id = %scope.tenant_id()))]
    pub async fn cancel_receipt(&self, scope: &TenantScope, lot_id: Uuid) -> LedgerResult<()> {
        let lot = find_lot(self.db_pool.as_ref(), scope, lot_id, false).await?;
        let source = LotSource::from_str(&lot.source_type).map_err(|_| {
            ServiceError::InternalError(format!(
                "stock lot {} has unknown source '{}'",
                lot.id, lot.source_type
            ))
        })?;
        if source == LotSource::MutationCredit {
            return Err(ServiceError::ValidationError(format!(
                "Stock lot {} came from a mutation; roll the mutation back instead",
                lot_id
            )));
        }

        let txn = transaction::begin(self.db_pool.as_ref()).await?;
        let result = self.ledger.remove_lot(&txn, scope, lot_id).await;
        let outcome = transaction::finish(txn, result).await?;

        info!(lot_id = %lot_id, quantity = %outcome.quantity, "Receipt cancelled");
        self.event_sender
            .publish(Event::ReceiptCancelled {
                tenant_id: scope.tenant_id(),
                lot_id,
                change: outcome.change(),
            })
            .await;

        Ok(())
    }
}
