//! Error handling for the PIX backend
//!
//! This module provides a unified error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "FLOW_DOCUMENT_ERROR")]
    FlowDocumentError,

    // External errors (502, 503, 504)
    #[serde(rename = "NO_ACTIVE_GATEWAY")]
    NoActiveGateway,
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No user is registered for the given Telegram id
    UserNotFound { telegram_id: i64 },
    /// No transaction matches the given correlation id
    TransactionNotFound { reference: String },
    /// Amount is invalid (negative, zero, or too precise)
    InvalidAmount { amount: String, reason: String },
}

/// Infrastructure-level errors (database, configuration, flow storage)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration, including gateways without an adapter
    Configuration { message: String },
    /// Flow document could not be read or parsed
    FlowStorage { message: String },
}

/// External service errors (payment gateways)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// No gateway configuration is currently active
    NoActiveGateway,
    /// Gateway (Efí, SuitPay, OpenPix) rejected the call or could not be reached
    PaymentGateway {
        gateway: String,
        message: String,
        is_retryable: bool,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field present but unusable
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { .. } => 404,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::InvalidAmount { .. } => 400,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::NoActiveGateway => 503,
                ExternalError::PaymentGateway { .. } => 502, // Bad Gateway
                ExternalError::Timeout { .. } => 504,        // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::FlowStorage { .. } => ErrorCode::FlowDocumentError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::NoActiveGateway => ErrorCode::NoActiveGateway,
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { telegram_id } => {
                    format!("User with Telegram id {} is not registered", telegram_id)
                }
                DomainError::TransactionNotFound { reference } => {
                    format!("Transaction '{}' not found", reference)
                }
                DomainError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::NoActiveGateway => {
                    "Payments are temporarily unavailable. Please try again later".to_string()
                }
                ExternalError::PaymentGateway {
                    gateway,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            gateway
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::FlowStorage { .. } => true,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::NoActiveGateway => true,
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Conversions from module errors live next to those errors
// (database/error.rs, payments/error.rs, flow/store.rs, services/payment_service.rs)

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_active_gateway_is_service_unavailable() {
        let error = AppError::new(AppErrorKind::External(ExternalError::NoActiveGateway));

        assert_eq!(error.status_code(), 503);
        assert_eq!(error.error_code(), ErrorCode::NoActiveGateway);
        assert!(error.user_message().contains("try again later"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_user_not_found_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::UserNotFound {
            telegram_id: 42,
        }));

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::UserNotFound);
        assert!(error.user_message().contains("42"));
    }

    #[test]
    fn test_gateway_error_message_depends_on_retryability() {
        let retryable = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            gateway: "efi".to_string(),
            message: "HTTP 503".to_string(),
            is_retryable: true,
        }));
        assert_eq!(retryable.status_code(), 502);
        assert!(retryable.user_message().contains("efi"));

        let permanent = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            gateway: "efi".to_string(),
            message: "HTTP 400".to_string(),
            is_retryable: false,
        }));
        assert!(permanent.user_message().contains("contact support"));
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}
