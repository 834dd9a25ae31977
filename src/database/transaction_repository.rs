use crate::database::error::DatabaseError;
use crate::database::models::{NewTransaction, Transaction, TransactionStatus, User};
use crate::database::repository::LedgerStore;
use crate::services::ledger::{
    evaluate_settlement, parse_extra_data, FinalizeResult, SettlementCheck,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use tracing::error;

const USER_COLUMNS: &str =
    "id, telegram_id, first_name, username, balance, total_spent, status, created_at";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, type, amount, status, description, created_at, extra_data";

/// Postgres ledger: users and their transactions.
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for TransactionRepository {
    async fn ping(&self) -> Result<(), DatabaseError> {
        crate::database::health_check(&self.pool).await
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_user_by_telegram_id(
        &self,
        telegram_id: i64,
    ) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE telegram_id = $1",
            USER_COLUMNS
        ))
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn register_user(
        &self,
        telegram_id: i64,
        first_name: Option<&str>,
        username: Option<&str>,
    ) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (telegram_id, first_name, username)
             VALUES ($1, $2, $3)
             ON CONFLICT (telegram_id) DO UPDATE
             SET first_name = COALESCE(EXCLUDED.first_name, users.first_name),
                 username = COALESCE(EXCLUDED.username, users.username)
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(telegram_id)
        .bind(first_name)
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "INSERT INTO transactions (user_id, type, amount, status, description, extra_data)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.kind.as_str())
        .bind(&new.amount)
        .bind(new.status.as_str())
        .bind(&new.description)
        .bind(&new.extra_data)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_transaction(&self, id: i64) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Narrow by substring in SQL, then confirm the exact txid on the parsed data.
    async fn find_transaction_by_txid(
        &self,
        txid: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let candidates = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE strpos(extra_data, $1) > 0 ORDER BY id ASC",
            TRANSACTION_COLUMNS
        ))
        .bind(txid)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(candidates
            .into_iter()
            .find(|txn| parse_extra_data(&txn.extra_data).txid == txid))
    }

    async fn find_first_pending_containing(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        // strpos matches the empty string everywhere
        if reference.is_empty() {
            return Ok(None);
        }

        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions
             WHERE status = $1 AND strpos(extra_data, $2) > 0
             ORDER BY id ASC
             LIMIT 1",
            TRANSACTION_COLUMNS
        ))
        .bind(TransactionStatus::Pending.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn finalize_atomically(
        &self,
        transaction_id: i64,
        amount_paid: &BigDecimal,
    ) -> Result<FinalizeResult, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Concurrent webhooks for the same charge queue up here
        let locked = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let locked = match locked {
            Some(transaction) => transaction,
            None => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Err(DatabaseError::not_found("Transaction", transaction_id));
            }
        };

        match evaluate_settlement(&locked, amount_paid) {
            SettlementCheck::AlreadyCompleted => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Ok(FinalizeResult::AlreadyCompleted);
            }
            SettlementCheck::AmountMismatch { expected, received } => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Ok(FinalizeResult::AmountMismatch { expected, received });
            }
            SettlementCheck::Credit => {}
        }

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions SET status = $2 WHERE id = $1 RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(TransactionStatus::Completed.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users
             SET balance = balance + $2, total_spent = total_spent + $2
             WHERE id = $1
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(locked.user_id)
        .bind(&locked.amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let user = match user {
            Some(user) => user,
            None => {
                error!(
                    transaction_id,
                    user_id = locked.user_id,
                    "transaction owner missing, finalize rolled back"
                );
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Err(DatabaseError::not_found("User", locked.user_id));
            }
        };

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(FinalizeResult::Completed { transaction, user })
    }
}
