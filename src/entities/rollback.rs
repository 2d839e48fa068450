use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only record of a rollback. `snapshot` holds a serialized
/// [`RollbackSnapshot`] with every field that changed.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rollbacks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub rollback_type: String,
    pub target_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub restored_quantity: Decimal,
    pub snapshot: Json,
    pub reason: Option<String>,
    pub performed_by: Uuid,
    pub performed_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::rollback_detail::Entity")]
    RollbackDetails,
    #[sea_orm(has_many = "super::rollback_log::Entity")]
    RollbackLogs,
}

impl Related<super::rollback_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RollbackDetails.def()
    }
}

impl Related<super::rollback_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RollbackLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn snapshot(&self) -> Result<RollbackSnapshot, serde_json::Error> {
        serde_json::from_value(self.snapshot.clone())
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
pub enum RollbackType {
    Mutation,
    Usage,
}

impl RollbackType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Single before/after field change captured during a rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub entity: String,
    pub entity_id: Uuid,
    pub field: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub changes: Vec<FieldChange>,
}

impl RollbackSnapshot {
    pub fn record(
        &mut self,
        entity: &str,
        entity_id: Uuid,
        field: &str,
        before: impl Serialize,
        after: impl Serialize,
    ) {
        self.changes.push(FieldChange {
            entity: entity.to_string(),
            entity_id,
            field: field.to_string(),
            before: serde_json::to_value(before).unwrap_or(serde_json::Value::Null),
            after: serde_json::to_value(after).unwrap_or(serde_json::Value::Null),
        });
    }

    pub fn changes_for(&self, entity_id: Uuid) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter().filter(move |c| c.entity_id == entity_id)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
