use http::StatusCode;
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use tracing::error;
use uuid::Uuid;

use crate::entities::{stock_lot::ItemType, usage::UsageStatus};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid owner: {0}")]
    InvalidOwner(String),

    #[error(
        "Insufficient stock of {item_type} {item_id} at owner {owner_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        owner_id: Uuid,
        item_id: Uuid,
        item_type: ItemType,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid transition for usage {usage_id}: {from} -> {to}")]
    InvalidTransition {
        usage_id: Uuid,
        from: UsageStatus,
        to: UsageStatus,
    },

    #[error("Already rolled back: {0}")]
    AlreadyRolledBack(String),

    #[error("Ledger integrity violation (audit reference {audit_ref}): {detail}")]
    IntegrityViolation { audit_ref: Uuid, detail: String },

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Raises an integrity violation with a fresh audit reference.
    ///
    /// The reference is logged together with the detail so that the opaque
    /// message shown to callers can be traced back to the failing booking.
    pub fn integrity(detail: impl Into<String>) -> Self {
        let audit_ref = Uuid::new_v4();
        let detail = detail.into();
        error!(audit_ref = %audit_ref, detail = %detail, "Ledger integrity violation");
        crate::metrics::INTEGRITY_VIOLATIONS.inc();
        ServiceError::IntegrityViolation { audit_ref, detail }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::IntegrityViolation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOwner(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidTransition { .. } | Self::AlreadyRolledBack(_) => StatusCode::CONFLICT,
        }
    }

    /// Returns the error message suitable for callers.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::IntegrityViolation { audit_ref, .. } => {
                format!("Stock ledger failure (audit reference {})", audit_ref)
            }
            _ => self.to_string(),
        }
    }

    /// Whether a job runner may re-attempt the operation that produced this error.
    ///
    /// Only transient connection-level database failures qualify. Domain errors
    /// are deterministic and integrity violations must never be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DatabaseError(db_err) => matches!(
                db_err,
                DbErr::ConnectionAcquire(_) | DbErr::Conn(_)
            ),
            _ => false,
        }
    }
}

pub type LedgerResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidOwner("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientStock {
                owner_id: Uuid::nil(),
                item_id: Uuid::nil(),
                item_type: ItemType::Feed,
                requested: dec!(10),
                available: dec!(5),
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::AlreadyRolledBack("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::IntegrityViolation {
                audit_ref: Uuid::nil(),
                detail: "x".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn insufficient_stock_message_names_item_and_quantities() {
        let item_id = Uuid::new_v4();
        let err = ServiceError::InsufficientStock {
            owner_id: Uuid::new_v4(),
            item_id,
            item_type: ItemType::Supply,
            requested: dec!(999),
            available: dec!(50),
        };
        let message = err.response_message();
        assert!(message.contains(&item_id.to_string()));
        assert!(message.contains("requested 999"));
        assert!(message.contains("available 50"));
        assert!(message.contains("supply"));
    }

    #[test]
    fn integrity_violation_message_is_opaque() {
        let audit_ref = Uuid::new_v4();
        let err = ServiceError::IntegrityViolation {
            audit_ref,
            detail: "lot 42 quantity_used would become -3".into(),
        };
        let message = err.response_message();
        assert!(message.contains(&audit_ref.to_string()));
        assert!(!message.contains("lot 42"));
    }

    #[test]
    fn only_connection_failures_are_retryable() {
        assert!(ServiceError::DatabaseError(DbErr::Conn(sea_orm::RuntimeErr::Internal(
            "reset".into()
        )))
        .is_retryable());
        assert!(!ServiceError::db_error("constraint").is_retryable());
        assert!(!ServiceError::integrity("broken").is_retryable());
        assert!(!ServiceError::ValidationError("bad".into()).is_retryable());
    }
}
