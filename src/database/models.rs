//! Persistent entities: bot users, ledger transactions and gateway configurations.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A bot user. `balance` and `total_spent` only change when a deposit completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub balance: BigDecimal,
    pub total_spent: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Purchase,
    Refund,
    ManualAdjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Purchase => "purchase",
            TransactionType::Refund => "refund",
            TransactionType::ManualAdjustment => "manual_adjustment",
        }
    }
}

impl TryFrom<String> for TransactionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "deposit" => Ok(TransactionType::Deposit),
            "purchase" => Ok(TransactionType::Purchase),
            "refund" => Ok(TransactionType::Refund),
            "manual_adjustment" => Ok(TransactionType::ManualAdjustment),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for TransactionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Ledger entry. Amounts are BRL in major units.
///
/// `extra_data` is kept as the raw JSON text it was stored with; use
/// `services::ledger::parse_extra_data` to read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    #[cfg_attr(feature = "database", sqlx(rename = "type", try_from = "String"))]
    pub kind: TransactionType,
    pub amount: BigDecimal,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub status: TransactionStatus,
    pub description: Option<String>,
    #[cfg_attr(feature = "database", sqlx(rename = "created_at"))]
    pub timestamp: DateTime<Utc>,
    pub extra_data: String,
}

/// Values for a transaction about to be inserted.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: i64,
    pub kind: TransactionType,
    pub amount: BigDecimal,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub extra_data: String,
}

/// Administrator-managed gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct GatewayConfig {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    #[serde(default)]
    pub is_sandbox: bool,
    #[serde(default = "empty_object")]
    pub credentials: JsonValue,
    #[serde(default = "empty_object")]
    pub operational_config: JsonValue,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Refunded,
        ] {
            assert_eq!(
                TransactionStatus::try_from(status.as_str().to_string()),
                Ok(status)
            );
        }
        assert!(TransactionType::try_from("gift".to_string()).is_err());
    }

    #[test]
    fn gateway_seed_defaults_missing_maps() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"id":1,"name":"openpix","is_active":true}"#).unwrap();

        assert!(!config.is_sandbox);
        assert!(config.credentials.as_object().is_some_and(|m| m.is_empty()));
    }
}
