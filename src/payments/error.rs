use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("No active payment gateway configured")]
    NoActiveGateway,

    #[error("Unsupported payment gateway: {name}")]
    UnsupportedGateway { name: String },

    #[error("Gateway communication error: gateway={gateway}, message={message}")]
    GatewayCommunication {
        gateway: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Gateway configuration error: gateway={gateway}, message={message}")]
    Configuration { gateway: String, message: String },

    #[error("Gateway configuration store error: {message}")]
    Storage { message: String },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        PaymentError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn configuration(gateway: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::Configuration {
            gateway: gateway.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::NoActiveGateway => true,
            PaymentError::UnsupportedGateway { .. } => false,
            // Network failures and timeouts carry no status
            PaymentError::GatewayCommunication { status, .. } => {
                status.map(|code| code >= 500 || code == 429).unwrap_or(true)
            }
            PaymentError::Validation { .. } => false,
            PaymentError::Configuration { .. } => false,
            PaymentError::Storage { .. } => true,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::NoActiveGateway => 503,
            PaymentError::UnsupportedGateway { .. } => 500,
            PaymentError::GatewayCommunication { .. } => 502,
            PaymentError::Validation { .. } => 400,
            PaymentError::Configuration { .. } => 500,
            PaymentError::Storage { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::NoActiveGateway => {
                "Payments are temporarily unavailable. Please try again later".to_string()
            }
            PaymentError::Validation { message, .. } => message.clone(),
            PaymentError::GatewayCommunication { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            PaymentError::UnsupportedGateway { .. }
            | PaymentError::Configuration { .. }
            | PaymentError::Storage { .. } => "Payment service is misconfigured".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, ExternalError, InfrastructureError, ValidationError,
        };

        let retryable = err.is_retryable();
        let kind = match err {
            PaymentError::NoActiveGateway => AppErrorKind::External(ExternalError::NoActiveGateway),
            PaymentError::GatewayCommunication {
                gateway, message, ..
            } => AppErrorKind::External(ExternalError::PaymentGateway {
                gateway,
                message,
                is_retryable: retryable,
            }),
            PaymentError::Validation { message, field } => match field {
                Some(field) => AppErrorKind::Validation(ValidationError::InvalidField {
                    field,
                    reason: message,
                }),
                None => AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "request".to_string(),
                    reason: message,
                }),
            },
            PaymentError::UnsupportedGateway { name } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: format!("no adapter registered for gateway '{}'", name),
                })
            }
            PaymentError::Configuration { gateway, message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: format!("{}: {}", gateway, message),
                })
            }
            PaymentError::Storage { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: retryable,
                })
            }
        };

        AppError::new(kind)
    }
}

impl From<crate::database::error::DatabaseError> for PaymentError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        PaymentError::Storage {
            message: err.to_string(),
        }
    }
}
