use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Consumption document. Stock is booked only while the status is `confirmed`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "usages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    pub used_on: NaiveDate,
    pub status: String,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::usage_item::Entity")]
    UsageItems,
    #[sea_orm(has_many = "super::usage_detail::Entity")]
    UsageDetails,
}

impl Related<super::usage_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UsageItems.def()
    }
}

impl Related<super::usage_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UsageDetails.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

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
pub enum UsageStatus {
    Draft,
    Confirmed,
    Cancelled,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Whether stock is booked against lots while the usage sits in this status.
    pub fn holds_stock(&self) -> bool {
        matches!(self, UsageStatus::Confirmed)
    }
}
