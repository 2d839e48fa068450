use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Flattened, queryable copy of each snapshot field change.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rollback_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub rollback_id: Uuid,
    pub entity: String,
    pub entity_id: Uuid,
    pub field: String,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
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
