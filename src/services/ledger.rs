//! Transaction ledger: pending charges, webhook lookup and exactly-once crediting.

use crate::database::error::DatabaseError;
use crate::database::models::{
    NewTransaction, Transaction, TransactionStatus, TransactionType, User,
};
use crate::database::repository::LedgerStore;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Largest accepted difference between expected and paid amounts (BRL).
pub fn amount_tolerance() -> BigDecimal {
    BigDecimal::from(5) / BigDecimal::from(100)
}

/// Correlation metadata stored with every gateway transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtraData {
    #[serde(default)]
    pub txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_screen_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarketing_success_data: Option<JsonValue>,
}

pub fn build_extra_data(data: &ExtraData) -> Result<String, LedgerError> {
    serde_json::to_string(data).map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// Read extra data leniently: unknown fields are ignored and malformed text
/// yields an empty value.
pub fn parse_extra_data(raw: &str) -> ExtraData {
    serde_json::from_str(raw).unwrap_or_default()
}

/// The only place where webhook references are matched against stored extra data.
///
/// Matching is raw substring containment over the serialized text, so
/// `"abc1"` also matches a transaction whose txid is `"abc123"`.
pub fn extra_data_references(extra_data: &str, reference: &str) -> bool {
    !reference.is_empty() && extra_data.contains(reference)
}

/// Correct a gateway amount that was reported in cents instead of reais.
///
/// Anything above ten times the expected amount is assumed to be cents.
pub fn normalize_reported_amount(expected: &BigDecimal, reported: &BigDecimal) -> BigDecimal {
    if *expected > BigDecimal::from(0) && *reported > expected * BigDecimal::from(10) {
        reported / BigDecimal::from(100)
    } else {
        reported.clone()
    }
}

/// Decision taken on a transaction row that is already locked.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementCheck {
    Credit,
    AlreadyCompleted,
    AmountMismatch {
        expected: BigDecimal,
        received: BigDecimal,
    },
}

pub fn evaluate_settlement(transaction: &Transaction, amount_paid: &BigDecimal) -> SettlementCheck {
    if transaction.status == TransactionStatus::Completed {
        return SettlementCheck::AlreadyCompleted;
    }

    let difference = (&transaction.amount - amount_paid).abs();
    if difference > amount_tolerance() {
        return SettlementCheck::AmountMismatch {
            expected: transaction.amount.clone(),
            received: amount_paid.clone(),
        };
    }

    SettlementCheck::Credit
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeResult {
    Completed { transaction: Transaction, user: User },
    AlreadyCompleted,
    AmountMismatch {
        expected: BigDecimal,
        received: BigDecimal,
    },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("failed to encode extra data: {0}")]
    Serialization(String),
}

impl From<LedgerError> for crate::error::AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Storage(db) => db.into(),
            LedgerError::Serialization(message) => {
                use crate::error::{AppError, AppErrorKind, InfrastructureError};
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: false,
                }))
            }
        }
    }
}

/// Everything needed to record a charge that the gateway has accepted.
#[derive(Debug, Clone)]
pub struct PendingCharge {
    pub user_id: i64,
    pub amount: BigDecimal,
    pub gateway_name: String,
    pub gateway_id: i64,
    pub correlation_id: String,
    pub external_id: String,
    pub screen_id: Option<String>,
    pub success_screen_id: Option<String>,
    pub remarketing_success_data: Option<JsonValue>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct TransactionLedger {
    store: Arc<dyn LedgerStore>,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// 128 random bits as 32 lowercase hex characters, valid as an Efí txid.
    pub fn generate_correlation_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    pub async fn create_pending(&self, charge: PendingCharge) -> Result<Transaction, LedgerError> {
        let extra_data = build_extra_data(&ExtraData {
            txid: charge.correlation_id.clone(),
            gateway_id: Some(charge.gateway_id),
            gateway: Some(charge.gateway_name.clone()),
            external_id: Some(charge.external_id.clone()),
            screen_id: charge.screen_id,
            success_screen_id: charge.success_screen_id,
            remarketing_success_data: charge.remarketing_success_data,
        })?;

        let transaction = self
            .store
            .insert_transaction(NewTransaction {
                user_id: charge.user_id,
                kind: TransactionType::Deposit,
                amount: charge.amount,
                status: TransactionStatus::Pending,
                description: charge
                    .description
                    .or_else(|| Some(format!("PIX deposit via {}", charge.gateway_name))),
                extra_data,
            })
            .await?;

        info!(
            transaction_id = transaction.id,
            txid = %charge.correlation_id,
            gateway = %charge.gateway_name,
            amount = %transaction.amount,
            "pending transaction recorded"
        );
        Ok(transaction)
    }

    /// First pending transaction (lowest id) whose extra data contains `reference`.
    pub async fn find_pending_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        if reference.trim().is_empty() {
            return Ok(None);
        }
        Ok(self.store.find_first_pending_containing(reference).await?)
    }

    pub async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        if correlation_id.trim().is_empty() {
            return Ok(None);
        }
        Ok(self.store.find_transaction_by_txid(correlation_id).await?)
    }

    /// Complete `transaction` if `amount_paid` matches, crediting its owner once.
    ///
    /// Any status other than `completed` may be finalized. The decision is
    /// re-evaluated by the store on the locked row, so concurrent calls for the
    /// same transaction credit at most once.
    pub async fn finalize(
        &self,
        transaction: &Transaction,
        amount_paid: &BigDecimal,
    ) -> Result<FinalizeResult, LedgerError> {
        if transaction.status == TransactionStatus::Completed {
            return Ok(FinalizeResult::AlreadyCompleted);
        }

        let normalized = normalize_reported_amount(&transaction.amount, amount_paid);
        if normalized != *amount_paid {
            warn!(
                transaction_id = transaction.id,
                reported = %amount_paid,
                normalized = %normalized,
                "gateway amount looked like cents, divided by 100"
            );
        }

        let result = self
            .store
            .finalize_atomically(transaction.id, &normalized)
            .await?;

        match &result {
            FinalizeResult::Completed { transaction, user } => info!(
                transaction_id = transaction.id,
                user_id = user.id,
                amount = %transaction.amount,
                balance = %user.balance,
                "transaction completed and balance credited"
            ),
            FinalizeResult::AlreadyCompleted => info!(
                transaction_id = transaction.id,
                "transaction already completed, nothing to do"
            ),
            FinalizeResult::AmountMismatch { expected, received } => warn!(
                transaction_id = transaction.id,
                expected = %expected,
                received = %received,
                fraud_signal = true,
                "paid amount does not match transaction amount"
            ),
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn transaction(amount: &str, status: TransactionStatus) -> Transaction {
        Transaction {
            id: 1,
            user_id: 1,
            kind: TransactionType::Deposit,
            amount: dec(amount),
            status,
            description: None,
            timestamp: Utc::now(),
            extra_data: r#"{"txid":"abc123","gateway_id":2}"#.to_string(),
        }
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let txn = transaction("10.00", TransactionStatus::Pending);

        assert_eq!(evaluate_settlement(&txn, &dec("10.05")), SettlementCheck::Credit);
        assert_eq!(evaluate_settlement(&txn, &dec("9.95")), SettlementCheck::Credit);
        assert!(matches!(
            evaluate_settlement(&txn, &dec("10.051")),
            SettlementCheck::AmountMismatch { .. }
        ));
        assert!(matches!(
            evaluate_settlement(&txn, &dec("9.9499")),
            SettlementCheck::AmountMismatch { .. }
        ));
    }

    #[test]
    fn completed_transactions_are_never_credited_again() {
        let txn = transaction("10.00", TransactionStatus::Completed);

        assert_eq!(
            evaluate_settlement(&txn, &dec("10.00")),
            SettlementCheck::AlreadyCompleted
        );
        assert_eq!(
            evaluate_settlement(&txn, &dec("999.00")),
            SettlementCheck::AlreadyCompleted
        );
    }

    #[test]
    fn failed_transactions_can_still_settle() {
        let txn = transaction("10.00", TransactionStatus::Failed);
        assert_eq!(evaluate_settlement(&txn, &dec("10.00")), SettlementCheck::Credit);
    }

    #[test]
    fn cents_heuristic_only_applies_above_ten_times() {
        assert_eq!(normalize_reported_amount(&dec("10.00"), &dec("1000")), dec("10.00"));
        assert_eq!(normalize_reported_amount(&dec("10.00"), &dec("100.00")), dec("100.00"));
        assert_eq!(normalize_reported_amount(&dec("10.00"), &dec("10.00")), dec("10.00"));
    }

    #[test]
    fn reference_matching_is_substring_containment() {
        let stored = r#"{"txid":"abc123","gateway_id":2}"#;

        assert!(extra_data_references(stored, "abc123"));
        // Known limitation: a prefix of a stored id matches as well
        assert!(extra_data_references(stored, "abc1"));
        // A longer id does not match a shorter stored one
        assert!(!extra_data_references(stored, "abc1234"));
        assert!(!extra_data_references(stored, ""));
    }

    #[test]
    fn extra_data_is_schema_on_read() {
        let parsed = parse_extra_data(
            r#"{"txid":"abc","gateway_id":3,"screen_id":"pay","unknown":true}"#,
        );
        assert_eq!(parsed.txid, "abc");
        assert_eq!(parsed.gateway_id, Some(3));
        assert_eq!(parsed.screen_id.as_deref(), Some("pay"));

        assert_eq!(parse_extra_data("not json"), ExtraData::default());
    }

    #[test]
    fn built_extra_data_omits_absent_fields() {
        let raw = build_extra_data(&ExtraData {
            txid: "abc123".to_string(),
            gateway_id: Some(2),
            ..ExtraData::default()
        })
        .unwrap();

        assert_eq!(raw, r#"{"txid":"abc123","gateway_id":2}"#);
    }

    #[test]
    fn correlation_ids_are_32_hex_chars() {
        let id = TransactionLedger::generate_correlation_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, TransactionLedger::generate_correlation_id());
    }
}
