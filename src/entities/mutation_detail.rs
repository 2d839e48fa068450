use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One transferred item of a mutation. `quantity` is in the item's base unit;
/// `requested_quantity` is what the caller entered in `unit_id`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mutation_details")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub mutation_id: Uuid,
    pub line_no: i32,
    pub item_id: Uuid,
    pub item_type: String,
    pub unit_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub requested_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity: Decimal,
    pub destination_lot_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::mutation::Entity",
        from = "Column::MutationId",
        to = "super::mutation::Column::Id"
    )]
    Mutation,
    #[sea_orm(has_many = "super::mutation_source::Entity")]
    MutationSources,
}

impl Related<super::mutation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Mutation.def()
    }
}

impl Related<super::mutation_source::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MutationSources.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
