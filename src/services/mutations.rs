use crate::{
    common::{StockKey, TenantScope},
    db::{transaction, DbPool},
    entities::{
        mutation::{self, Entity as Mutation, MutationStatus},
        mutation_detail::{self, Entity as MutationDetail},
        mutation_source::{self, Entity as MutationSource},
        stock_lot::{BookingKind, ItemType, LotSource},
    },
    errors::{LedgerResult, ServiceError},
    events::{BalanceChange, Event, EventSender},
    metrics,
    services::{
        collaborators::{to_base_quantity, OwnerDirectory, UnitConverter},
        ledger::{Booking, ChangeSet, LedgerService},
    },
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationItem {
    pub item_type: ItemType,
    pub item_id: Uuid,
    pub unit_id: Uuid,
    pub quantity: Decimal,
}

/// Transfer of one or more items from a source owner to a destination owner.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MutateStock {
    pub source_owner_id: Uuid,
    pub destination_owner_id: Uuid,
    #[validate(length(min = 1, message = "A mutation needs at least one item"))]
    pub items: Vec<MutationItem>,
    pub mutated_on: NaiveDate,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
    pub actor_id: Uuid,
}

/// One mutation detail with the source lots it was drawn from.
#[derive(Debug, Clone, Serialize)]
pub struct MutationLine {
    pub detail: mutation_detail::Model,
    pub sources: Vec<mutation_source::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationRecord {
    pub mutation: mutation::Model,
    pub lines: Vec<MutationLine>,
    /// Net balance movement per key; empty when loaded back from storage
    pub changes: Vec<BalanceChange>,
}

impl MutationRecord {
    pub fn status(&self) -> Option<MutationStatus> {
        MutationStatus::from_str(&self.mutation.status).ok()
    }
}

struct PreparedItem {
    item: MutationItem,
    base_quantity: Decimal,
    source_key: StockKey,
    destination_key: StockKey,
}

pub struct MutationService {
    db_pool: Arc<DbPool>,
    ledger: LedgerService,
    converter: Arc<dyn UnitConverter>,
    owners: Arc<dyn OwnerDirectory>,
    event_sender: Arc<EventSender>,
}

impl MutationService {
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

    /// Moves every item atomically: all bookings commit together or none do.
    #[instrument(skip(self, scope, request), fields(
        tenant_id = %scope.tenant_id(),
        source_owner_id = %request.source_owner_id,
        destination_owner_id = %request.destination_owner_id,
        items = request.items.len()
    ))]
    pub async fn mutate(
        &self,
        scope: &TenantScope,
        request: MutateStock,
    ) -> LedgerResult<MutationRecord> {
        let result = self.try_mutate(scope, request).await;
        match &result {
            Ok(record) => {
                metrics::MUTATIONS.inc();
                info!(mutation_id = %record.mutation.id, "Stock mutation committed");
            }
            Err(e) => {
                metrics::MUTATION_FAILURES.inc();
                error!(error = %e, "Stock mutation rejected");
            }
        }
        let record = result?;

        self.event_sender
            .publish(Event::MutationCommitted {
                tenant_id: scope.tenant_id(),
                mutation_id: record.mutation.id,
                source_owner_id: record.mutation.source_owner_id,
                destination_owner_id: record.mutation.destination_owner_id,
                changes: record.changes.clone(),
            })
            .await;

        Ok(record)
    }

    async fn try_mutate(
        &self,
        scope: &TenantScope,
        request: MutateStock,
    ) -> LedgerResult<MutationRecord> {
        request.validate()?;
        if request.source_owner_id == request.destination_owner_id {
            return Err(ServiceError::ValidationError(
                "Source and destination owner must differ".to_string(),
            ));
        }
        if let Some(bad) = request.items.iter().find(|i| i.quantity <= Decimal::ZERO) {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for item {} must be positive, got {}",
                bad.item_id, bad.quantity
            )));
        }
        for owner_id in [request.source_owner_id, request.destination_owner_id] {
            if !self.owners.owner_exists(scope, owner_id).await? {
                return Err(ServiceError::InvalidOwner(format!(
                    "Owner {} does not exist",
                    owner_id
                )));
            }
        }

        // Conversions are external lookups; finish them before any row is locked.
        let mut prepared = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let base_quantity = to_base_quantity(
                self.converter.as_ref(),
                item.item_id,
                item.unit_id,
                item.quantity,
            )
            .await?;
            prepared.push(PreparedItem {
                item: item.clone(),
                base_quantity,
                source_key: scope.key(request.source_owner_id, item.item_id, item.item_type),
                destination_key: scope.key(
                    request.destination_owner_id,
                    item.item_id,
                    item.item_type,
                ),
            });
        }

        let txn = transaction::begin(self.db_pool.as_ref()).await?;
        let result = self.book_mutation(&txn, scope, &request, &prepared).await;
        transaction::finish(txn, result).await
    }

    async fn book_mutation<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &TenantScope,
        request: &MutateStock,
        prepared: &[PreparedItem],
    ) -> LedgerResult<MutationRecord> {
        self.ledger
            .lock_aggregates(
                conn,
                prepared
                    .iter()
                    .flat_map(|p| [p.source_key, p.destination_key]),
            )
            .await?;

        let now = Utc::now();
        let mutation_id = Uuid::new_v4();
        let header = mutation::ActiveModel {
            id: Set(mutation_id),
            tenant_id: Set(scope.tenant_id()),
            source_owner_id: Set(request.source_owner_id),
            destination_owner_id: Set(request.destination_owner_id),
            mutated_on: Set(request.mutated_on),
            notes: Set(request.notes.clone()),
            status: Set(MutationStatus::Committed.as_str().to_string()),
            created_by: Set(request.actor_id),
            created_at: Set(now),
            rolled_back_at: Set(None),
            rolled_back_by: Set(None),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut changes = ChangeSet::default();
        let mut lines = Vec::with_capacity(prepared.len());
        for (line_no, item) in prepared.iter().enumerate() {
            let debit = self
                .ledger
                .book(conn, item.source_key, item.base_quantity, Booking::Mutated)
                .await?;
            let credit = self
                .ledger
                .book(
                    conn,
                    item.destination_key,
                    item.base_quantity,
                    Booking::In {
                        acquired_on: request.mutated_on,
                        source: LotSource::MutationCredit,
                        source_id: Some(mutation_id),
                    },
                )
                .await?;
            changes.record(debit.key, debit.balance_before, debit.balance_after);
            changes.record(credit.key, credit.balance_before, credit.balance_after);

            let destination_lot_id = credit
                .postings
                .first()
                .map(|p| p.lot_id)
                .ok_or_else(|| ServiceError::integrity("mutation credit produced no lot"))?;

            let detail = mutation_detail::ActiveModel {
                id: Set(Uuid::new_v4()),
                mutation_id: Set(mutation_id),
                line_no: Set(line_no as i32 + 1),
                item_id: Set(item.item.item_id),
                item_type: Set(item.item.item_type.as_str().to_string()),
                unit_id: Set(item.item.unit_id),
                requested_quantity: Set(item.item.quantity),
                quantity: Set(item.base_quantity),
                destination_lot_id: Set(destination_lot_id),
                created_at: Set(now),
            }
            .insert(conn)
            .await
            .map_err(ServiceError::db_error)?;

            let mut sources = Vec::with_capacity(debit.postings.len());
            for (seq, posting) in debit.postings.iter().enumerate() {
                debug_assert_eq!(posting.kind, BookingKind::Mutated);
                let source = mutation_source::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    mutation_detail_id: Set(detail.id),
                    lot_id: Set(posting.lot_id),
                    seq: Set(seq as i32 + 1),
                    quantity: Set(posting.quantity),
                }
                .insert(conn)
                .await
                .map_err(ServiceError::db_error)?;
                sources.push(source);
            }

            lines.push(MutationLine { detail, sources });
        }

        Ok(MutationRecord {
            mutation: header,
            lines,
            changes: changes.into_changes(),
        })
    }

    /// Loads a mutation with its details and source linkage.
    pub async fn get_mutation(
        &self,
        scope: &TenantScope,
        mutation_id: Uuid,
    ) -> LedgerResult<MutationRecord> {
        load_mutation(self.db_pool.as_ref(), scope, mutation_id).await
    }
}

pub(crate) async fn load_mutation<C: ConnectionTrait>(
    conn: &C,
    scope: &TenantScope,
    mutation_id: Uuid,
) -> LedgerResult<MutationRecord> {
    let header = Mutation::find_by_id(mutation_id)
        .filter(mutation::Column::TenantId.eq(scope.tenant_id()))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Mutation {} not found", mutation_id)))?;

    let details = MutationDetail::find()
        .filter(mutation_detail::Column::MutationId.eq(mutation_id))
        .order_by_asc(mutation_detail::Column::LineNo)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut lines = Vec::with_capacity(details.len());
    for detail in details {
        let sources = MutationSource::find()
            .filter(mutation_source::Column::MutationDetailId.eq(detail.id))
            .order_by_asc(mutation_source::Column::Seq)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
        lines.push(MutationLine { detail, sources });
    }

    Ok(MutationRecord {
        mutation: header,
        lines,
        changes: Vec::new(),
    })
}
