use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::common::StockKey;
use crate::errors::ServiceError;

/// One inbound quantity (purchase or mutation credit) with its running
/// consumption counters. `quantity_used + quantity_mutated <= quantity_in`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_lots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    pub item_id: Uuid,
    pub item_type: String,
    pub acquired_on: NaiveDate,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity_in: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity_used: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity_mutated: Decimal,
    pub source_type: String,
    pub source_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::usage_detail::Entity")]
    UsageDetails,
    #[sea_orm(has_many = "super::mutation_source::Entity")]
    MutationSources,
}

impl Related<super::usage_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UsageDetails.def()
    }
}

impl Related<super::mutation_source::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MutationSources.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn available(&self) -> Decimal {
        self.quantity_in - self.quantity_used - self.quantity_mutated
    }

    pub fn is_exhausted(&self) -> bool {
        self.available() <= Decimal::ZERO
    }

    pub fn counters(&self) -> LotCounters {
        LotCounters {
            quantity_in: self.quantity_in,
            quantity_used: self.quantity_used,
            quantity_mutated: self.quantity_mutated,
        }
    }

    pub fn item_type(&self) -> Result<ItemType, ServiceError> {
        ItemType::from_str(&self.item_type).map_err(|_| {
            ServiceError::InternalError(format!(
                "stock lot {} has unknown item type '{}'",
                self.id, self.item_type
            ))
        })
    }

    pub fn key(&self) -> Result<StockKey, ServiceError> {
        Ok(StockKey {
            tenant_id: self.tenant_id,
            owner_id: self.owner_id,
            item_id: self.item_id,
            item_type: self.item_type()?,
        })
    }
}

/// Snapshot of a lot's three counters, used for audit before/after records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotCounters {
    pub quantity_in: Decimal,
    pub quantity_used: Decimal,
    pub quantity_mutated: Decimal,
}

impl LotCounters {
    pub fn available(&self) -> Decimal {
        self.quantity_in - self.quantity_used - self.quantity_mutated
    }

    pub fn get(&self, kind: BookingKind) -> Decimal {
        match kind {
            BookingKind::In => self.quantity_in,
            BookingKind::Used => self.quantity_used,
            BookingKind::Mutated => self.quantity_mutated,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.quantity_in >= Decimal::ZERO
            && self.quantity_used >= Decimal::ZERO
            && self.quantity_mutated >= Decimal::ZERO
            && self.quantity_used + self.quantity_mutated <= self.quantity_in
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemType {
    Feed,
    Supply,
    Livestock,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Which lot counter a booking moves.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BookingKind {
    In,
    Used,
    Mutated,
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn column(&self) -> &'static str {
        match self {
            BookingKind::In => "quantity_in",
            BookingKind::Used => "quantity_used",
            BookingKind::Mutated => "quantity_mutated",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LotSource {
    Purchase,
    MutationCredit,
    OpeningBalance,
}

impl LotSource {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}
