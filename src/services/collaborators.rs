//! Lookups the ledger consumes but does not own: unit conversion and owner
//! (farm / livestock batch) existence. Production callers plug in their own
//! implementations; the in-memory ones back tests and the CLI.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::common::{round_quantity, TenantScope};
use crate::errors::{LedgerResult, ServiceError};

#[async_trait]
pub trait UnitConverter: Send + Sync {
    /// Base unit every lot of `item_id` is kept in.
    async fn base_unit(&self, item_id: Uuid) -> LedgerResult<Option<Uuid>>;

    /// Converts `quantity` of `item_id` between units. `None` means no
    /// conversion is configured.
    async fn convert(
        &self,
        item_id: Uuid,
        from_unit: Uuid,
        to_unit: Uuid,
        quantity: Decimal,
    ) -> LedgerResult<Option<Decimal>>;
}

#[async_trait]
pub trait OwnerDirectory: Send + Sync {
    async fn owner_exists(&self, scope: &TenantScope, owner_id: Uuid) -> LedgerResult<bool>;
}

/// Converts a caller quantity into the item's base unit, rounded to the
/// stored quantity scale.
pub async fn to_base_quantity(
    converter: &dyn UnitConverter,
    item_id: Uuid,
    unit_id: Uuid,
    quantity: Decimal,
) -> LedgerResult<Decimal> {
    let base = converter.base_unit(item_id).await?.ok_or_else(|| {
        ServiceError::ValidationError(format!("Item {} has no base unit configured", item_id))
    })?;
    if base == unit_id {
        return Ok(quantity);
    }
    let converted = converter
        .convert(item_id, unit_id, base, quantity)
        .await?
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "No conversion from unit {} to base unit {} for item {}",
                unit_id, base, item_id
            ))
        })?;
    let rounded = round_quantity(converted);
    if rounded <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Quantity {} converts to non-positive base quantity {}",
            quantity, rounded
        )));
    }
    Ok(rounded)
}

/// Per-item base unit plus multiplicative factors into that base.
#[derive(Debug, Default)]
pub struct ConversionTable {
    base_units: DashMap<Uuid, Uuid>,
    factors: DashMap<(Uuid, Uuid), Decimal>,
}

impl ConversionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_base_unit(&self, item_id: Uuid, unit_id: Uuid) {
        self.base_units.insert(item_id, unit_id);
    }

    /// One `unit_id` equals `factor` base units of `item_id`.
    pub fn set_factor(&self, item_id: Uuid, unit_id: Uuid, factor: Decimal) {
        self.factors.insert((item_id, unit_id), factor);
    }
}

#[async_trait]
impl UnitConverter for ConversionTable {
    async fn base_unit(&self, item_id: Uuid) -> LedgerResult<Option<Uuid>> {
        Ok(self.base_units.get(&item_id).map(|u| *u))
    }

    async fn convert(
        &self,
        item_id: Uuid,
        from_unit: Uuid,
        to_unit: Uuid,
        quantity: Decimal,
    ) -> LedgerResult<Option<Decimal>> {
        if from_unit == to_unit {
            return Ok(Some(quantity));
        }
        let from = self.factor(item_id, from_unit);
        let to = self.factor(item_id, to_unit);
        Ok(match (from, to) {
            (Some(from), Some(to)) => quantity
                .checked_mul(from)
                .and_then(|base| base.checked_div(to)),
            _ => None,
        })
    }
}

impl ConversionTable {
    fn factor(&self, item_id: Uuid, unit_id: Uuid) -> Option<Decimal> {
        if self.base_units.get(&item_id).map(|b| *b) == Some(unit_id) {
            return Some(Decimal::ONE);
        }
        self.factors.get(&(item_id, unit_id)).map(|f| *f)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOwnerDirectory {
    owners: DashSet<(Uuid, Uuid)>,
}

impl InMemoryOwnerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, scope: &TenantScope, owner_id: Uuid) {
        self.owners.insert((scope.tenant_id(), owner_id));
    }
}

#[async_trait]
impl OwnerDirectory for InMemoryOwnerDirectory {
    async fn owner_exists(&self, scope: &TenantScope, owner_id: Uuid) -> LedgerResult<bool> {
        Ok(self.owners.contains(&(scope.tenant_id(), owner_id)))
    }
}
