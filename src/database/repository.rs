//! Storage traits used by the ledger and the gateway registry.
//!
//! Postgres implementations live in `transaction_repository` and
//! `gateway_config_repository`; `memory` provides in-process equivalents.

use crate::database::error::DatabaseError;
use crate::database::models::{GatewayConfig, NewTransaction, Transaction, User};
use crate::services::ledger::FinalizeResult;
use async_trait::async_trait;
use bigdecimal::BigDecimal;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Cheap connectivity check for health reporting
    async fn ping(&self) -> Result<(), DatabaseError>;

    async fn find_user(&self, id: i64) -> Result<Option<User>, DatabaseError>;

    async fn find_user_by_telegram_id(&self, telegram_id: i64)
        -> Result<Option<User>, DatabaseError>;

    /// Insert the user if unknown, otherwise refresh its names. Returns the stored row.
    async fn register_user(
        &self,
        telegram_id: i64,
        first_name: Option<&str>,
        username: Option<&str>,
    ) -> Result<User, DatabaseError>;

    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, DatabaseError>;

    async fn find_transaction(&self, id: i64) -> Result<Option<Transaction>, DatabaseError>;

    /// Transaction whose extra data records exactly this correlation id, any status
    async fn find_transaction_by_txid(&self, txid: &str)
        -> Result<Option<Transaction>, DatabaseError>;

    /// Lowest-id pending transaction whose raw extra data contains `reference`.
    ///
    /// Plain substring containment: a reference that is a prefix of another
    /// correlation id matches that transaction too.
    async fn find_first_pending_containing(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Re-read the transaction under a lock, decide with
    /// `services::ledger::evaluate_settlement`, and on `Credit` mark it completed
    /// and credit the owner in the same atomic unit.
    async fn finalize_atomically(
        &self,
        transaction_id: i64,
        amount_paid: &BigDecimal,
    ) -> Result<FinalizeResult, DatabaseError>;
}

#[async_trait]
pub trait GatewayConfigStore: Send + Sync {
    /// Active configurations ordered by id, lowest first
    async fn list_active(&self) -> Result<Vec<GatewayConfig>, DatabaseError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<GatewayConfig>, DatabaseError>;
}
