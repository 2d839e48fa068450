/*!
 * Transaction Helper Utilities
 *
 * Ledger services open a transaction with `begin()`, do their locked work and
 * hand the outcome to [`finish`], which commits on success and rolls back on
 * any error so no partial booking is ever persisted.
 */

use metrics::counter;
use sea_orm::{DatabaseTransaction, TransactionTrait};
use tracing::{debug, warn};

use crate::errors::ServiceError;

/// Opens a transaction on any connection that supports one.
pub async fn begin<C>(db: &C) -> Result<DatabaseTransaction, ServiceError>
where
    C: TransactionTrait,
{
    counter!("farm_ledger.transaction.started", 1);
    db.begin().await.map_err(ServiceError::db_error)
}

/// Commits `txn` if `result` is `Ok`, otherwise rolls it back and returns the
/// original error unchanged.
pub async fn finish<T>(
    txn: DatabaseTransaction,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            txn.commit().await.map_err(ServiceError::db_error)?;
            counter!("farm_ledger.transaction.committed", 1);
            debug!("Transaction committed");
            Ok(value)
        }
        Err(err) => {
            counter!("farm_ledger.transaction.rolled_back", 1);
            warn!(error = %err, "Transaction rolled back");
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Explicit rollback failed; dropping transaction");
            }
            Err(err)
        }
    }
}
