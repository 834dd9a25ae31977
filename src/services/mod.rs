//! Services module for business logic and integrations

pub mod ledger;
pub mod notification;
pub mod payment_service;
pub mod webhook_processor;

pub use ledger::{FinalizeResult, LedgerError, PendingCharge, TransactionLedger};
pub use notification::{
    LogNotifier, NotificationError, NotificationQueue, Notifier, PendingNotification,
};
pub use payment_service::{
    CreatePaymentRequest, PaymentCreated, PaymentService, PaymentServiceError, PaymentStatus,
    RegisterUserRequest,
};
pub use webhook_processor::{WebhookOutcome, WebhookReconciler};
