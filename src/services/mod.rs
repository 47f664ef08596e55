use sea_orm::DatabaseTransaction;

pub mod cart_service;
pub mod catalog_service;
pub mod inventory_service;
pub mod order_service;

/// Roll back an aborted unit of work. A failed rollback is only logged; the
/// error that caused the abort is what the caller reports.
pub(crate) async fn rollback(txn: DatabaseTransaction) {
    if let Err(err) = txn.rollback().await {
        tracing::warn!(error = %err, "rollback failed");
    }
}
