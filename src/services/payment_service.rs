//! Charge creation entrypoint used by the bot and the HTTP API.

use crate::database::models::{TransactionStatus, User};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::logging::mask_tax_id;
use crate::payments::error::PaymentError;
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::{format_amount, validate_amount, ChargeRequest};
use crate::payments::utils::only_digits;
use crate::services::ledger::{parse_extra_data, LedgerError, PendingCharge, TransactionLedger};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{error, info, warn};

const FALLBACK_PAYER_NAME: &str = "Cliente";

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentRequest {
    pub telegram_id: i64,
    pub amount: BigDecimal,
    #[serde(default)]
    pub gateway: Option<String>,
    /// Screen the charge was started from
    #[serde(default)]
    pub screen_id: Option<String>,
    #[serde(default)]
    pub success_screen_id: Option<String>,
    #[serde(default)]
    pub remarketing: Option<JsonValue>,
    #[serde(default)]
    pub payer_name: Option<String>,
    #[serde(default)]
    pub payer_tax_id: Option<String>,
    #[serde(default)]
    pub payer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentCreated {
    pub correlation_id: String,
    pub transaction_id: i64,
    pub pix_copy_paste: String,
    pub qr_image: String,
    pub status: TransactionStatus,
    pub gateway: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentStatus {
    pub correlation_id: String,
    pub transaction_id: i64,
    pub status: TransactionStatus,
    pub amount: String,
    pub gateway: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUserRequest {
    pub telegram_id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Error)]
pub enum PaymentServiceError {
    #[error("user with telegram id {telegram_id} not found")]
    UserNotFound { telegram_id: i64 },

    #[error("payment {correlation_id} not found")]
    PaymentNotFound { correlation_id: String },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error(transparent)]
    Gateway(#[from] PaymentError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<PaymentServiceError> for AppError {
    fn from(err: PaymentServiceError) -> Self {
        match err {
            PaymentServiceError::UserNotFound { telegram_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::UserNotFound { telegram_id }))
            }
            PaymentServiceError::PaymentNotFound { correlation_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference: correlation_id,
                }))
            }
            PaymentServiceError::InvalidField { field, reason } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field,
                    reason,
                }))
            }
            PaymentServiceError::Gateway(e) => e.into(),
            PaymentServiceError::Ledger(e) => e.into(),
        }
    }
}

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

pub struct PaymentService {
    registry: Arc<GatewayRegistry>,
    ledger: TransactionLedger,
}

impl PaymentService {
    pub fn new(registry: Arc<GatewayRegistry>, ledger: TransactionLedger) -> Self {
        Self { registry, ledger }
    }

    /// Create or refresh the user behind a Telegram chat.
    pub async fn register_user(&self, request: RegisterUserRequest) -> Result<User, PaymentServiceError> {
        let user = self
            .ledger
            .store()
            .register_user(
                request.telegram_id,
                request.first_name.as_deref(),
                request.username.as_deref(),
            )
            .await
            .map_err(LedgerError::from)?;
        Ok(user)
    }

    /// Create a PIX charge on the selected gateway and record it as pending.
    ///
    /// The remote charge is created first and no lock is held while the
    /// gateway is called. If the gateway fails nothing is stored.
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, PaymentServiceError> {
        validate_amount(&request.amount)?;
        let payer_email = normalize_email(request.payer_email.as_deref())?;
        let payer_tax_id = normalize_tax_id(request.payer_tax_id.as_deref())?;

        let user = self
            .ledger
            .store()
            .find_user_by_telegram_id(request.telegram_id)
            .await
            .map_err(LedgerError::from)?
            .ok_or(PaymentServiceError::UserNotFound {
                telegram_id: request.telegram_id,
            })?;

        let config = self.registry.resolve(request.gateway.as_deref()).await?;
        let client = self.registry.create_client(&config).await?;
        let correlation_id = TransactionLedger::generate_correlation_id();

        let payer_name = request
            .payer_name
            .clone()
            .or_else(|| user.first_name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_PAYER_NAME.to_string());

        info!(
            txid = %correlation_id,
            user_id = user.id,
            gateway = %config.name,
            amount = %request.amount,
            payer_tax_id = %payer_tax_id.as_deref().map(mask_tax_id).unwrap_or_default(),
            "creating PIX charge"
        );

        let charge = client
            .create_charge(ChargeRequest {
                correlation_id: correlation_id.clone(),
                amount: request.amount.clone(),
                payer_name,
                payer_tax_id,
                payer_email,
                description: None,
            })
            .await
            .map_err(|e| {
                warn!(
                    txid = %correlation_id,
                    gateway = %config.name,
                    error = %e,
                    "gateway rejected charge, nothing recorded"
                );
                e
            })?;

        let transaction = match self
            .ledger
            .create_pending(PendingCharge {
                user_id: user.id,
                amount: request.amount.clone(),
                gateway_name: config.name.clone(),
                gateway_id: config.id,
                correlation_id: correlation_id.clone(),
                external_id: charge.external_reference.clone(),
                screen_id: request.screen_id,
                success_screen_id: request.success_screen_id,
                remarketing_success_data: request.remarketing,
                description: None,
            })
            .await
        {
            Ok(transaction) => transaction,
            Err(e) => {
                error!(
                    txid = %correlation_id,
                    external_id = %charge.external_reference,
                    gateway = %config.name,
                    error = %e,
                    "remote charge exists but the local transaction could not be recorded"
                );
                return Err(e.into());
            }
        };

        Ok(PaymentCreated {
            correlation_id,
            transaction_id: transaction.id,
            pix_copy_paste: charge.pix_copy_paste,
            qr_image: charge.qr_image,
            status: transaction.status,
            gateway: config.name,
            amount: format_amount(&transaction.amount),
        })
    }

    /// Local status of a charge, for the "check payment" button.
    pub async fn payment_status(
        &self,
        correlation_id: &str,
    ) -> Result<PaymentStatus, PaymentServiceError> {
        let transaction = self
            .ledger
            .find_by_correlation_id(correlation_id)
            .await?
            .ok_or_else(|| PaymentServiceError::PaymentNotFound {
                correlation_id: correlation_id.to_string(),
            })?;

        let extra = parse_extra_data(&transaction.extra_data);
        Ok(PaymentStatus {
            correlation_id: correlation_id.to_string(),
            transaction_id: transaction.id,
            status: transaction.status,
            amount: format_amount(&transaction.amount),
            gateway: extra.gateway,
            created_at: transaction.timestamp,
        })
    }
}

fn normalize_email(email: Option<&str>) -> Result<Option<String>, PaymentServiceError> {
    match email.map(str::trim).filter(|e| !e.is_empty()) {
        None => Ok(None),
        Some(email) if is_valid_email(email) => Ok(Some(email.to_lowercase())),
        Some(_) => Err(PaymentServiceError::InvalidField {
            field: "payer_email".to_string(),
            reason: "not a valid e-mail address".to_string(),
        }),
    }
}

/// CPF (11 digits) or CNPJ (14 digits), punctuation allowed.
fn normalize_tax_id(tax_id: Option<&str>) -> Result<Option<String>, PaymentServiceError> {
    let Some(raw) = tax_id.filter(|t| !t.trim().is_empty()) else {
        return Ok(None);
    };
    let digits = only_digits(raw);
    match digits.len() {
        11 | 14 => Ok(Some(digits)),
        _ => Err(PaymentServiceError::InvalidField {
            field: "payer_tax_id".to_string(),
            reason: "expected a CPF or CNPJ".to_string(),
        }),
    }
}
