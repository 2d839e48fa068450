use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::entities::stock_lot::ItemType;

/// Decimal places every stored quantity is kept at.
pub const QUANTITY_SCALE: u32 = 4;

/// Rounds a computed quantity to the stored scale.
pub fn round_quantity(quantity: Decimal) -> Decimal {
    quantity.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// True when `quantity` carries no digits beyond the stored scale.
pub fn fits_quantity_scale(quantity: Decimal) -> bool {
    quantity.round_dp(QUANTITY_SCALE) == quantity
}

/// Tenant boundary threaded through every ledger call.
///
/// Callers resolve the tenant (company) at their own edge; the ledger only
/// uses it to scope reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    tenant_id: Uuid,
}

impl TenantScope {
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn key(&self, owner_id: Uuid, item_id: Uuid, item_type: ItemType) -> StockKey {
        StockKey {
            tenant_id: self.tenant_id,
            owner_id,
            item_id,
            item_type,
        }
    }
}

/// Identity of one aggregate balance: (owner, item, type) within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    pub item_id: Uuid,
    pub item_type: ItemType,
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}:{}",
            self.tenant_id, self.owner_id, self.item_type, self.item_id
        )
    }
}
