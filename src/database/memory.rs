//! In-process stores used when no database is configured, and in tests.
//!
//! Every finalize runs under one mutex, which gives the same at-most-once
//! crediting as the row lock taken by the Postgres store.

use crate::database::error::DatabaseError;
use crate::database::models::{
    GatewayConfig, NewTransaction, Transaction, TransactionStatus, User,
};
use crate::database::repository::{GatewayConfigStore, LedgerStore};
use crate::services::ledger::{
    evaluate_settlement, extra_data_references, parse_extra_data, FinalizeResult, SettlementCheck,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct LedgerState {
    users: BTreeMap<i64, User>,
    transactions: BTreeMap<i64, Transaction>,
    next_user_id: i64,
    next_transaction_id: i64,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All transactions in id order
    pub async fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().await.transactions.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_telegram_id(
        &self,
        telegram_id: i64,
    ) -> Result<Option<User>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|user| user.telegram_id == telegram_id)
            .cloned())
    }

    async fn register_user(
        &self,
        telegram_id: i64,
        first_name: Option<&str>,
        username: Option<&str>,
    ) -> Result<User, DatabaseError> {
        let mut state = self.state.lock().await;

        if let Some(user) = state
            .users
            .values_mut()
            .find(|user| user.telegram_id == telegram_id)
        {
            if let Some(first_name) = first_name {
                user.first_name = Some(first_name.to_string());
            }
            if let Some(username) = username {
                user.username = Some(username.to_string());
            }
            return Ok(user.clone());
        }

        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            telegram_id,
            first_name: first_name.map(str::to_string),
            username: username.map(str::to_string),
            balance: BigDecimal::from(0),
            total_spent: BigDecimal::from(0),
            status: "active".to_string(),
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&new.user_id) {
            return Err(DatabaseError::not_found("User", new.user_id));
        }

        state.next_transaction_id += 1;
        let transaction = Transaction {
            id: state.next_transaction_id,
            user_id: new.user_id,
            kind: new.kind,
            amount: new.amount,
            status: new.status,
            description: new.description,
            timestamp: Utc::now(),
            extra_data: new.extra_data,
        };
        state
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn find_transaction(&self, id: i64) -> Result<Option<Transaction>, DatabaseError> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn find_transaction_by_txid(
        &self,
        txid: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .find(|txn| parse_extra_data(&txn.extra_data).txid == txid)
            .cloned())
    }

    async fn find_first_pending_containing(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .find(|txn| {
                txn.status == TransactionStatus::Pending
                    && extra_data_references(&txn.extra_data, reference)
            })
            .cloned())
    }

    async fn finalize_atomically(
        &self,
        transaction_id: i64,
        amount_paid: &BigDecimal,
    ) -> Result<FinalizeResult, DatabaseError> {
        let mut state = self.state.lock().await;

        let locked = state
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Transaction", transaction_id))?;

        match evaluate_settlement(&locked, amount_paid) {
            SettlementCheck::AlreadyCompleted => return Ok(FinalizeResult::AlreadyCompleted),
            SettlementCheck::AmountMismatch { expected, received } => {
                return Ok(FinalizeResult::AmountMismatch { expected, received })
            }
            SettlementCheck::Credit => {}
        }

        // Both rows are checked before either is touched
        let user = state
            .users
            .get_mut(&locked.user_id)
            .ok_or_else(|| DatabaseError::not_found("User", locked.user_id))?;
        user.balance += &locked.amount;
        user.total_spent += &locked.amount;
        let user = user.clone();

        let transaction = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| DatabaseError::not_found("Transaction", transaction_id))?;
        transaction.status = TransactionStatus::Completed;

        Ok(FinalizeResult::Completed {
            transaction: transaction.clone(),
            user,
        })
    }
}

#[derive(Default)]
pub struct MemoryGatewayConfigStore {
    configs: RwLock<Vec<GatewayConfig>>,
}

impl MemoryGatewayConfigStore {
    pub fn new(configs: Vec<GatewayConfig>) -> Self {
        Self {
            configs: RwLock::new(configs),
        }
    }

    /// Load configurations from a JSON array file.
    pub async fn from_seed_file(path: &str) -> Result<Self, DatabaseError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::ConnectionError {
                message: format!("cannot read gateway seed {}: {}", path, e),
            })
        })?;
        let configs: Vec<GatewayConfig> = serde_json::from_str(&raw).map_err(|e| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::Decode {
                message: format!("invalid gateway seed {}: {}", path, e),
            })
        })?;
        Ok(Self::new(configs))
    }

    /// Insert or replace the configuration with the same name.
    pub async fn upsert(&self, config: GatewayConfig) {
        let mut configs = self.configs.write().await;
        match configs.iter_mut().find(|c| c.name == config.name) {
            Some(existing) => *existing = config,
            None => configs.push(config),
        }
    }

    pub async fn set_active(&self, name: &str, active: bool) -> bool {
        let mut configs = self.configs.write().await;
        match configs.iter_mut().find(|c| c.name == name) {
            Some(config) => {
                config.is_active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl GatewayConfigStore for MemoryGatewayConfigStore {
    async fn list_active(&self) -> Result<Vec<GatewayConfig>, DatabaseError> {
        let mut active: Vec<GatewayConfig> = self
            .configs
            .read()
            .await
            .iter()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        active.sort_by_key(|c| c.id);
        Ok(active)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<GatewayConfig>, DatabaseError> {
        Ok(self
            .configs
            .read()
            .await
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned())
    }
}
