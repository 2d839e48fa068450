use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-lot quantity restored by a rollback, tagged with the counter it reversed.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rollback_details")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub rollback_id: Uuid,
    pub lot_id: Uuid,
    pub booking_kind: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::rollback::Entity",
        from = "Column::RollbackId",
        to = "super::rollback::Column::Id"
    )]
    Rollback,
}

impl Related<super::rollback::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rollback.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
