use crate::{
    common::{StockKey, TenantScope},
    db::{transaction, DbPool},
    entities::{
        stock_lot::{BookingKind, ItemType},
        usage::{self, Entity as Usage, UsageStatus},
        usage_detail::{self, Entity as UsageDetail},
        usage_item::{self, Entity as UsageItem},
    },
    errors::{LedgerResult, ServiceError},
    events::{BalanceChange, Event, EventSender},
    metrics,
    services::{
        collaborators::{to_base_quantity, OwnerDirectory, UnitConverter},
        ledger::{find_lot, Booking, ChangeSet, LedgerService},
    },
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLine {
    pub item_type: ItemType,
    pub item_id: Uuid,
    pub unit_id: Uuid,
    pub quantity: Decimal,
}

/// Consumption of stock by its owner.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitUsage {
    pub owner_id: Uuid,
    pub used_on: NaiveDate,
    #[validate(length(min = 1, message = "A usage needs at least one item"))]
    pub items: Vec<UsageLine>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub usage: usage::Model,
    pub items: Vec<usage_item::Model>,
    /// Lot linkage; only present while the usage is confirmed
    pub details: Vec<usage_detail::Model>,
    /// Net balance movement caused by the call that returned this record
    pub changes: Vec<BalanceChange>,
}

impl UsageRecord {
    pub fn status(&self) -> LedgerResult<UsageStatus> {
        parse_status(&self.usage)
    }
}

/// Stock effect of moving a usage between two statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    Book,
    Unbook,
    StatusOnly,
    NoChange,
}

/// The usage state machine. `None` marks a transition that is not allowed.
pub fn plan_transition(from: UsageStatus, to: UsageStatus) -> Option<TransitionEffect> {
    use UsageStatus::*;
    match (from, to) {
        (a, b) if a == b => Some(TransitionEffect::NoChange),
        (Draft, Confirmed) => Some(TransitionEffect::Book),
        (Confirmed, Cancelled) => Some(TransitionEffect::Unbook),
        (Draft, Cancelled) => Some(TransitionEffect::StatusOnly),
        _ => None,
    }
}

struct PreparedLine {
    line: UsageLine,
    base_quantity: Decimal,
}

pub struct UsageService {
    db_pool: Arc<DbPool>,
    ledger: LedgerService,
    converter: Arc<dyn UnitConverter>,
    owners: Arc<dyn OwnerDirectory>,
    event_sender: Arc<EventSender>,
}

impl UsageService {
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

    /// Stores a draft usage. Nothing is booked until it is confirmed.
    #[instrument(skip(self, scope, request), fields(tenant_id = %scope.tenant_id(), owner_id = %request.owner_id))]
    pub async fn submit(&self, scope: &TenantScope, request: SubmitUsage) -> LedgerResult<UsageRecord> {
        let prepared = self.prepare(scope, &request).await?;

        let txn = transaction::begin(self.db_pool.as_ref()).await?;
        let result = insert_usage(&txn, scope, &request, &prepared).await;
        let record = transaction::finish(txn, result).await?;

        info!(usage_id = %record.usage.id, "Usage submitted as draft");
        Ok(record)
    }

    /// Submits and confirms in one transaction.
    #[instrument(skip(self, scope, request), fields(tenant_id = %scope.tenant_id(), owner_id = %request.owner_id))]
    pub async fn record_usage(
        &self,
        scope: &TenantScope,
        request: SubmitUsage,
    ) -> LedgerResult<UsageRecord> {
        let prepared = self.prepare(scope, &request).await?;

        let txn = transaction::begin(self.db_pool.as_ref()).await?;
        let result = async {
            let draft = insert_usage(&txn, scope, &request, &prepared).await?;
            self.apply_transition(&txn, scope, draft.usage, UsageStatus::Confirmed)
                .await
        }
        .await;
        let record = transaction::finish(txn, result).await?;

        self.after_status_change(scope, UsageStatus::Draft, &record).await;
        Ok(record)
    }

    /// Moves a usage to `target`, booking or restoring stock as the state
    /// machine requires. The status change and the bookings commit together.
    #[instrument(skip(self, scope), fields(tenant_id = %scope.tenant_id()))]
    pub async fn transition(
        &self,
        scope: &TenantScope,
        usage_id: Uuid,
        target: UsageStatus,
    ) -> LedgerResult<UsageRecord> {
        let txn = transaction::begin(self.db_pool.as_ref()).await?;
        let result = async {
            let current = Usage::find_by_id(usage_id)
                .filter(usage::Column::TenantId.eq(scope.tenant_id()))
                .lock_exclusive()
                .one(&txn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::NotFound(format!("Usage {} not found", usage_id)))?;
            let from = parse_status(&current)?;
            let record = self.apply_transition(&txn, scope, current, target).await?;
            Ok::<_, ServiceError>((from, record))
        }
        .await;
        let (from, record) = transaction::finish(txn, result).await?;

        if from != target {
            self.after_status_change(scope, from, &record).await;
        }
        Ok(record)
    }

    /// Records that a background transition gave up. The status is left as is.
    #[instrument(skip(self, scope, reason), fields(tenant_id = %scope.tenant_id()))]
    pub async fn mark_transition_failed(
        &self,
        scope: &TenantScope,
        usage_id: Uuid,
        reason: &str,
    ) -> LedgerResult<usage::Model> {
        let db = self.db_pool.as_ref();
        let current = find_usage(db, scope, usage_id).await?;

        let now = Utc::now();
        let mut active: usage::ActiveModel = current.into();
        active.failure_reason = Set(Some(reason.to_string()));
        active.failed_at = Set(Some(now));
        active.updated_at = Set(now);
        let updated = active.update(db).await.map_err(ServiceError::db_error)?;

        warn!(usage_id = %usage_id, reason = %reason, "Usage transition marked failed");
        Ok(updated)
    }

    pub async fn get_usage(&self, scope: &TenantScope, usage_id: Uuid) -> LedgerResult<UsageRecord> {
        let db = self.db_pool.as_ref();
        let usage = find_usage(db, scope, usage_id).await?;
        load_record(db, usage, Vec::new()).await
    }

    async fn prepare(
        &self,
        scope: &TenantScope,
        request: &SubmitUsage,
    ) -> LedgerResult<Vec<PreparedLine>> {
        request.validate()?;
        if let Some(bad) = request.items.iter().find(|i| i.quantity <= Decimal::ZERO) {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for item {} must be positive, got {}",
                bad.item_id, bad.quantity
            )));
        }
        if !self.owners.owner_exists(scope, request.owner_id).await? {
            return Err(ServiceError::InvalidOwner(format!(
                "Owner {} does not exist",
                request.owner_id
            )));
        }

        let mut prepared = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let base_quantity =
                to_base_quantity(self.converter.as_ref(), line.item_id, line.unit_id, line.quantity)
                    .await?;
            prepared.push(PreparedLine {
                line: line.clone(),
                base_quantity,
            });
        }
        Ok(prepared)
    }

    async fn apply_transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &TenantScope,
        current: usage::Model,
        target: UsageStatus,
    ) -> LedgerResult<UsageRecord> {
        let from = parse_status(&current)?;
        let effect = plan_transition(from, target).ok_or(ServiceError::InvalidTransition {
            usage_id: current.id,
            from,
            to: target,
        })?;

        let mut changes = ChangeSet::default();
        match effect {
            TransitionEffect::NoChange => {
                return load_record(conn, current, Vec::new()).await;
            }
            TransitionEffect::StatusOnly => {}
            TransitionEffect::Book => {
                self.book_items(conn, scope, &current, &mut changes).await?;
            }
            TransitionEffect::Unbook => {
                self.restore_details(conn, scope, &current, &mut changes)
                    .await?;
            }
        }

        let now = Utc::now();
        let mut active: usage::ActiveModel = current.into();
        active.status = Set(target.as_str().to_string());
        active.updated_at = Set(now);
        match target {
            UsageStatus::Confirmed => {
                active.confirmed_at = Set(Some(now));
                active.failure_reason = Set(None);
                active.failed_at = Set(None);
            }
            UsageStatus::Cancelled => active.cancelled_at = Set(Some(now)),
            UsageStatus::Draft => {}
        }
        let updated = active.update(conn).await.map_err(ServiceError::db_error)?;

        load_record(conn, updated, changes.into_changes()).await
    }

    async fn book_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &TenantScope,
        usage: &usage::Model,
        changes: &mut ChangeSet,
    ) -> LedgerResult<()> {
        let items = load_items(conn, usage.id).await?;
        let keys = items
            .iter()
            .map(|item| item_key(scope, usage.owner_id, item))
            .collect::<LedgerResult<Vec<StockKey>>>()?;
        self.ledger.lock_aggregates(conn, keys.iter().copied()).await?;

        let now = Utc::now();
        for (item, key) in items.iter().zip(keys) {
            let outcome = self
                .ledger
                .book(conn, key, item.quantity, Booking::Used)
                .await?;
            changes.record(key, outcome.balance_before, outcome.balance_after);

            for (seq, posting) in outcome.postings.iter().enumerate() {
                usage_detail::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    usage_id: Set(usage.id),
                    usage_item_id: Set(item.id),
                    lot_id: Set(posting.lot_id),
                    seq: Set(seq as i32 + 1),
                    quantity_taken: Set(posting.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(conn)
                .await
                .map_err(ServiceError::db_error)?;
            }
        }
        Ok(())
    }

    async fn restore_details<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &TenantScope,
        usage: &usage::Model,
        changes: &mut ChangeSet,
    ) -> LedgerResult<()> {
        let details = load_details(conn, usage.id).await?;
        let mut keys = Vec::with_capacity(details.len());
        for detail in &details {
            keys.push(find_lot(conn, scope, detail.lot_id, false).await?.key()?);
        }
        self.ledger.lock_aggregates(conn, keys).await?;

        for detail in details {
            let outcome = self
                .ledger
                .unbook(
                    conn,
                    scope,
                    detail.lot_id,
                    BookingKind::Used,
                    detail.quantity_taken,
                )
                .await?;
            changes.record(outcome.key, outcome.balance_before, outcome.balance_after);
            UsageDetail::delete_by_id(detail.id)
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?;
        }
        Ok(())
    }

    async fn after_status_change(&self, scope: &TenantScope, from: UsageStatus, record: &UsageRecord) {
        let to = match record.status() {
            Ok(status) => status,
            Err(_) => return,
        };
        metrics::USAGE_TRANSITIONS
            .with_label_values(&[to.as_str()])
            .inc();
        info!(
            usage_id = %record.usage.id,
            from = from.as_str(),
            to = to.as_str(),
            "Usage status changed"
        );
        self.event_sender
            .publish(Event::UsageStatusChanged {
                tenant_id: scope.tenant_id(),
                usage_id: record.usage.id,
                from,
                to,
                changes: record.changes.clone(),
            })
            .await;
    }
}

fn parse_status(usage: &usage::Model) -> LedgerResult<UsageStatus> {
    UsageStatus::from_str(&usage.status).map_err(|_| {
        ServiceError::InternalError(format!(
            "usage {} has unknown status '{}'",
            usage.id, usage.status
        ))
    })
}

fn item_key(scope: &TenantScope, owner_id: Uuid, item: &usage_item::Model) -> LedgerResult<StockKey> {
    let item_type = ItemType::from_str(&item.item_type).map_err(|_| {
        ServiceError::InternalError(format!(
            "usage item {} has unknown item type '{}'",
            item.id, item.item_type
        ))
    })?;
    Ok(scope.key(owner_id, item.item_id, item_type))
}

async fn insert_usage<C: ConnectionTrait>(
    conn: &C,
    scope: &TenantScope,
    request: &SubmitUsage,
    prepared: &[PreparedLine],
) -> LedgerResult<UsageRecord> {
    let now = Utc::now();
    let usage = usage::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(scope.tenant_id()),
        owner_id: Set(request.owner_id),
        used_on: Set(request.used_on),
        status: Set(UsageStatus::Draft.as_str().to_string()),
        notes: Set(request.notes.clone()),
        created_by: Set(request.actor_id),
        created_at: Set(now),
        updated_at: Set(now),
        confirmed_at: Set(None),
        cancelled_at: Set(None),
        failure_reason: Set(None),
        failed_at: Set(None),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    let mut items = Vec::with_capacity(prepared.len());
    for (line_no, line) in prepared.iter().enumerate() {
        let item = usage_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            usage_id: Set(usage.id),
            line_no: Set(line_no as i32 + 1),
            item_id: Set(line.line.item_id),
            item_type: Set(line.line.item_type.as_str().to_string()),
            unit_id: Set(line.line.unit_id),
            requested_quantity: Set(line.line.quantity),
            quantity: Set(line.base_quantity),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;
        items.push(item);
    }

    Ok(UsageRecord {
        usage,
        items,
        details: Vec::new(),
        changes: Vec::new(),
    })
}

async fn find_usage<C: ConnectionTrait>(
    conn: &C,
    scope: &TenantScope,
    usage_id: Uuid,
) -> LedgerResult<usage::Model> {
    Usage::find_by_id(usage_id)
        .filter(usage::Column::TenantId.eq(scope.tenant_id()))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Usage {} not found", usage_id)))
}

async fn load_items<C: ConnectionTrait>(
    conn: &C,
    usage_id: Uuid,
) -> LedgerResult<Vec<usage_item::Model>> {
    UsageItem::find()
        .filter(usage_item::Column::UsageId.eq(usage_id))
        .order_by_asc(usage_item::Column::LineNo)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

async fn load_details<C: ConnectionTrait>(
    conn: &C,
    usage_id: Uuid,
) -> LedgerResult<Vec<usage_detail::Model>> {
    UsageDetail::find()
        .filter(usage_detail::Column::UsageId.eq(usage_id))
        .order_by_asc(usage_detail::Column::UsageItemId)
        .order_by_asc(usage_detail::Column::Seq)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

async fn load_record<C: ConnectionTrait>(
    conn: &C,
    usage: usage::Model,
    changes: Vec<BalanceChange>,
) -> LedgerResult<UsageRecord> {
    let items = load_items(conn, usage.id).await?;
    let details = load_details(conn, usage.id).await?;
    Ok(UsageRecord {
        usage,
        items,
        details,
        changes,
    })
}
