use crate::{
    common::TenantScope,
    db::{transaction, DbPool},
    entities::{
        mutation::{self, Entity as Mutation, MutationStatus},
        rollback::{self, Entity as Rollback, RollbackSnapshot, RollbackType},
        rollback_detail::{self, Entity as RollbackDetail},
        rollback_log::{self, Entity as RollbackLog},
        stock_lot::BookingKind,
        usage::{self, Entity as Usage, UsageStatus},
        usage_detail::{self, Entity as UsageDetail},
    },
    errors::{LedgerResult, ServiceError},
    events::{BalanceChange, Event, EventSender},
    metrics,
    services::{
        ledger::{find_lot, ChangeSet, LedgerService, UnbookOutcome},
        mutations::load_mutation,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct RollbackRecord {
    pub rollback: rollback::Model,
    pub details: Vec<rollback_detail::Model>,
    pub logs: Vec<rollback_log::Model>,
    pub changes: Vec<BalanceChange>,
}

impl RollbackRecord {
    pub fn snapshot(&self) -> LedgerResult<RollbackSnapshot> {
        self.rollback
            .snapshot()
            .map_err(|e| ServiceError::InternalError(format!("unreadable rollback snapshot: {}", e)))
    }
}

/// Collects what a rollback did before it is written out in one go.
struct RollbackDraft {
    rollback_type: RollbackType,
    target_id: Uuid,
    snapshot: RollbackSnapshot,
    postings: Vec<(Uuid, BookingKind, Decimal)>,
    changes: ChangeSet,
    restored: Decimal,
}

impl RollbackDraft {
    fn new(rollback_type: RollbackType, target_id: Uuid) -> Self {
        Self {
            rollback_type,
            target_id,
            snapshot: RollbackSnapshot::default(),
            postings: Vec::new(),
            changes: ChangeSet::default(),
            restored: Decimal::ZERO,
        }
    }

    fn record_unbook(&mut self, outcome: &UnbookOutcome) {
        let field = outcome.kind.column();
        self.snapshot.record(
            "stock_lot",
            outcome.lot_id,
            field,
            outcome.lot_before.get(outcome.kind),
            outcome.lot_after.get(outcome.kind),
        );
        self.postings
            .push((outcome.lot_id, outcome.kind, outcome.quantity));
        self.changes
            .record(outcome.key, outcome.balance_before, outcome.balance_after);
    }
}

pub struct RollbackService {
    db_pool: Arc<DbPool>,
    ledger: LedgerService,
    event_sender: Arc<EventSender>,
}

impl RollbackService {
    pub fn new(db_pool: Arc<DbPool>, ledger: LedgerService, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            ledger,
            event_sender,
        }
    }

    /// Reverses a committed mutation on exactly the lots it touched.
    #[instrument(skip(self, scope, reason), fields(tenant_id = %scope.tenant_id()))]
    pub async fn rollback_mutation(
        &self,
        scope: &TenantScope,
        mutation_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> LedgerResult<RollbackRecord> {
        let txn = transaction::begin(self.db_pool.as_ref()).await?;
        let result = self
            .reverse_mutation(&txn, scope, mutation_id, actor_id, reason)
            .await;
        let record = transaction::finish(txn, result).await?;

        self.after_rollback(scope, &record).await;
        Ok(record)
    }

    /// Gives back `quantity` (default: all of it) of one usage detail.
    #[instrument(skip(self, scope, reason), fields(tenant_id = %scope.tenant_id()))]
    pub async fn rollback_usage_detail(
        &self,
        scope: &TenantScope,
        usage_detail_id: Uuid,
        quantity: Option<Decimal>,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> LedgerResult<RollbackRecord> {
        let txn = transaction::begin(self.db_pool.as_ref()).await?;
        let result = self
            .reverse_usage_detail(&txn, scope, usage_detail_id, quantity, actor_id, reason)
            .await;
        let record = transaction::finish(txn, result).await?;

        self.after_rollback(scope, &record).await;
        Ok(record)
    }

    /// Rollbacks recorded against a mutation or usage detail, oldest first.
    pub async fn rollbacks_for(
        &self,
        scope: &TenantScope,
        target_id: Uuid,
    ) -> LedgerResult<Vec<rollback::Model>> {
        Rollback::find()
            .filter(rollback::Column::TenantId.eq(scope.tenant_id()))
            .filter(rollback::Column::TargetId.eq(target_id))
            .order_by_asc(rollback::Column::PerformedAt)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Loads a stored rollback with its detail and log rows.
    #[instrument(skip(self, scope), fields(tenant_id = %scope.tenant_id()))]
    pub async fn get_rollback(
        &self,
        scope: &TenantScope,
        rollback_id: Uuid,
    ) -> LedgerResult<RollbackRecord> {
        load_rollback(self.db_pool.as_ref(), scope, rollback_id).await
    }

    async fn reverse_mutation<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &TenantScope,
        mutation_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> LedgerResult<RollbackRecord> {
        let header = Mutation::find_by_id(mutation_id)
            .filter(mutation::Column::TenantId.eq(scope.tenant_id()))
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Mutation {} not found", mutation_id)))?;

        match MutationStatus::from_str(&header.status) {
            Ok(MutationStatus::Committed) => {}
            Ok(MutationStatus::RolledBack) => {
                return Err(ServiceError::AlreadyRolledBack(format!(
                    "Mutation {} was already rolled back",
                    mutation_id
                )))
            }
            Err(_) => {
                return Err(ServiceError::InternalError(format!(
                    "mutation {} has unknown status '{}'",
                    mutation_id, header.status
                )))
            }
        }

        let record = load_mutation(conn, scope, mutation_id).await?;
        let mut keys = Vec::new();
        for line in &record.lines {
            keys.push(find_lot(conn, scope, line.detail.destination_lot_id, false).await?.key()?);
            for source in &line.sources {
                keys.push(find_lot(conn, scope, source.lot_id, false).await?.key()?);
            }
        }
        self.ledger.lock_aggregates(conn, keys).await?;

        let mut draft = RollbackDraft::new(RollbackType::Mutation, mutation_id);
        for line in record.lines.iter().rev() {
            let credit = self
                .ledger
                .unbook(
                    conn,
                    scope,
                    line.detail.destination_lot_id,
                    BookingKind::In,
                    line.detail.quantity,
                )
                .await?;
            draft.record_unbook(&credit);

            for source in line.sources.iter().rev() {
                let debit = self
                    .ledger
                    .unbook(conn, scope, source.lot_id, BookingKind::Mutated, source.quantity)
                    .await?;
                draft.record_unbook(&debit);
            }
            draft.restored += line.detail.quantity;
        }

        let now = Utc::now();
        draft.snapshot.record(
            "mutation",
            mutation_id,
            "status",
            MutationStatus::Committed.as_str(),
            MutationStatus::RolledBack.as_str(),
        );
        let mut active: mutation::ActiveModel = header.into();
        active.status = Set(MutationStatus::RolledBack.as_str().to_string());
        active.rolled_back_at = Set(Some(now));
        active.rolled_back_by = Set(Some(actor_id));
        active.update(conn).await.map_err(ServiceError::db_error)?;

        persist(conn, scope, draft, actor_id, reason).await
    }

    async fn reverse_usage_detail<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &TenantScope,
        usage_detail_id: Uuid,
        quantity: Option<Decimal>,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> LedgerResult<RollbackRecord> {
        let detail = match UsageDetail::find_by_id(usage_detail_id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
        {
            Some(detail) => detail,
            None => {
                let previous = Rollback::find()
                    .filter(rollback::Column::TenantId.eq(scope.tenant_id()))
                    .filter(rollback::Column::TargetId.eq(usage_detail_id))
                    .filter(rollback::Column::RollbackType.eq(RollbackType::Usage.as_str()))
                    .count(conn)
                    .await
                    .map_err(ServiceError::db_error)?;
                return Err(if previous > 0 {
                    ServiceError::AlreadyRolledBack(format!(
                        "Usage detail {} was already fully rolled back",
                        usage_detail_id
                    ))
                } else {
                    ServiceError::NotFound(format!("Usage detail {} not found", usage_detail_id))
                });
            }
        };

        let usage = Usage::find_by_id(detail.usage_id)
            .filter(usage::Column::TenantId.eq(scope.tenant_id()))
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Usage detail {} not found", usage_detail_id))
            })?;
        if UsageStatus::from_str(&usage.status).ok() != Some(UsageStatus::Confirmed) {
            return Err(ServiceError::ValidationError(format!(
                "Usage {} is not confirmed; only confirmed usage can be rolled back",
                usage.id
            )));
        }

        if detail.quantity_taken <= Decimal::ZERO {
            return Err(ServiceError::AlreadyRolledBack(format!(
                "Usage detail {} has nothing left to roll back",
                usage_detail_id
            )));
        }
        let quantity = quantity.unwrap_or(detail.quantity_taken);
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Rollback quantity must be positive, got {}",
                quantity
            )));
        }
        let remaining = detail.quantity_taken - quantity;
        if remaining < Decimal::ZERO {
            return Err(ServiceError::integrity(format!(
                "rolling back {} from usage detail {} holding {} would go negative",
                quantity, usage_detail_id, detail.quantity_taken
            )));
        }

        let key = find_lot(conn, scope, detail.lot_id, false).await?.key()?;
        self.ledger.lock_aggregates(conn, [key]).await?;

        let mut draft = RollbackDraft::new(RollbackType::Usage, usage_detail_id);
        draft.snapshot.record(
            "usage_detail",
            detail.id,
            "quantity_taken",
            detail.quantity_taken,
            remaining,
        );
        let outcome = self
            .ledger
            .unbook(conn, scope, detail.lot_id, BookingKind::Used, quantity)
            .await?;
        draft.record_unbook(&outcome);
        draft.restored = quantity;

        if remaining.is_zero() {
            UsageDetail::delete_by_id(detail.id)
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?;
        } else {
            let mut active: usage_detail::ActiveModel = detail.into();
            active.quantity_taken = Set(remaining);
            active.updated_at = Set(Utc::now());
            active.update(conn).await.map_err(ServiceError::db_error)?;
        }

        persist(conn, scope, draft, actor_id, reason).await
    }

    async fn after_rollback(&self, scope: &TenantScope, record: &RollbackRecord) {
        metrics::ROLLBACKS
            .with_label_values(&[record.rollback.rollback_type.as_str()])
            .inc();
        info!(
            rollback_id = %record.rollback.id,
            rollback_type = %record.rollback.rollback_type,
            target_id = %record.rollback.target_id,
            restored = %record.rollback.restored_quantity,
            "Rollback performed"
        );

        let rollback_type = match RollbackType::from_str(&record.rollback.rollback_type) {
            Ok(t) => t,
            Err(_) => return,
        };
        self.event_sender
            .publish(Event::RollbackPerformed {
                tenant_id: scope.tenant_id(),
                rollback_id: record.rollback.id,
                rollback_type,
                target_id: record.rollback.target_id,
                changes: record.changes.clone(),
            })
            .await;
    }
}

fn log_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Appends the rollback header, its per-lot details and flattened logs.
async fn persist<C: ConnectionTrait>(
    conn: &C,
    scope: &TenantScope,
    draft: RollbackDraft,
    actor_id: Uuid,
    reason: Option<String>,
) -> LedgerResult<RollbackRecord> {
    let now = Utc::now();
    let snapshot = serde_json::to_value(&draft.snapshot)
        .map_err(|e| ServiceError::InternalError(format!("cannot encode snapshot: {}", e)))?;

    let header = rollback::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(scope.tenant_id()),
        rollback_type: Set(draft.rollback_type.as_str().to_string()),
        target_id: Set(draft.target_id),
        restored_quantity: Set(draft.restored),
        snapshot: Set(snapshot),
        reason: Set(reason),
        performed_by: Set(actor_id),
        performed_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    let mut details = Vec::with_capacity(draft.postings.len());
    for (lot_id, kind, quantity) in &draft.postings {
        let detail = rollback_detail::ActiveModel {
            id: Set(Uuid::new_v4()),
            rollback_id: Set(header.id),
            lot_id: Set(*lot_id),
            booking_kind: Set(kind.as_str().to_string()),
            quantity: Set(*quantity),
            created_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;
        details.push(detail);
    }

    let mut logs = Vec::with_capacity(draft.snapshot.changes.len());
    for change in &draft.snapshot.changes {
        let log = rollback_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            rollback_id: Set(header.id),
            entity: Set(change.entity.clone()),
            entity_id: Set(change.entity_id),
            field: Set(change.field.clone()),
            before_value: Set(log_value(&change.before)),
            after_value: Set(log_value(&change.after)),
            created_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;
        logs.push(log);
    }

    Ok(RollbackRecord {
        rollback: header,
        details,
        logs,
        changes: draft.changes.into_changes(),
    })
}

async fn load_rollback<C: ConnectionTrait>(
    conn: &C,
    scope: &TenantScope,
    rollback_id: Uuid,
) -> LedgerResult<RollbackRecord> {
    let rollback = Rollback::find_by_id(rollback_id)
        .filter(rollback::Column::TenantId.eq(scope.tenant_id()))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Rollback {} not found", rollback_id)))?;
    let details = RollbackDetail::find()
        .filter(rollback_detail::Column::RollbackId.eq(rollback_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    let logs = RollbackLog::find()
        .filter(rollback_log::Column::RollbackId.eq(rollback_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(RollbackRecord {
        rollback,
        details,
        logs,
        changes: Vec::new(),
    })
}
