//! Gateway webhook reconciliation.
//!
//! Every delivery goes through parse, status filter, transaction lookup,
//! finalize and notify. The outcome is always reported back as a value so the
//! HTTP layer can acknowledge the gateway with 200 whatever happened.

use crate::database::models::{Transaction, TransactionStatus, User};
use crate::flow::resolver::FlowGraphResolver;
use crate::payments::types::{GatewayName, SettlementNotice, WebhookParse};
use crate::payments::webhook::parse_gateway_webhook;
use crate::services::ledger::{FinalizeResult, LedgerError, TransactionLedger};
use crate::services::notification::{NotificationQueue, Notifier, PendingNotification};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    AlreadyProcessed,
    Ignored,
    NotFound,
    AmountMismatch,
    Rejected,
    Error,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::AlreadyProcessed => "already_processed",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::NotFound => "not_found",
            WebhookOutcome::AmountMismatch => "amount_mismatch",
            WebhookOutcome::Rejected => "rejected",
            WebhookOutcome::Error => "error",
        }
    }
}

impl std::fmt::Display for WebhookOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct WebhookReconciler {
    ledger: TransactionLedger,
    resolver: FlowGraphResolver,
    notifier: Arc<dyn Notifier>,
    retry_queue: Option<NotificationQueue>,
}

impl WebhookReconciler {
    pub fn new(
        ledger: TransactionLedger,
        resolver: FlowGraphResolver,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            resolver,
            notifier,
            retry_queue: None,
        }
    }

    /// Queue failed confirmations for the retry worker instead of dropping them.
    pub fn with_retry_queue(mut self, queue: NotificationQueue) -> Self {
        self.retry_queue = Some(queue);
        self
    }

    pub async fn handle(&self, gateway: GatewayName, body: &[u8]) -> WebhookOutcome {
        let (notices, rejected) = match parse_gateway_webhook(gateway, body) {
            WebhookParse::Settled(notices) => (notices, Vec::new()),
            WebhookParse::PartlySettled { notices, rejected } => (notices, rejected),
            WebhookParse::Ignored { status } => {
                info!(gateway = %gateway, status = %status, "webhook ignored, not a settlement");
                return WebhookOutcome::Ignored;
            }
            WebhookParse::Invalid { reason } => {
                warn!(gateway = %gateway, reason = %reason, "webhook payload rejected");
                return WebhookOutcome::Rejected;
            }
        };

        if notices.is_empty() {
            return WebhookOutcome::Ignored;
        }

        // Each entry of a batch settles on its own; the first failure is reported
        let mut outcome = WebhookOutcome::Processed;
        for notice in &notices {
            let result = self.reconcile(gateway, notice).await;
            if outcome == WebhookOutcome::Processed && result != WebhookOutcome::Processed {
                outcome = result;
            }
        }

        if !rejected.is_empty() {
            warn!(
                gateway = %gateway,
                rejected = rejected.len(),
                reasons = %rejected.join("; "),
                "webhook batch carried unusable entries"
            );
            if outcome == WebhookOutcome::Processed {
                outcome = WebhookOutcome::Rejected;
            }
        }
        outcome
    }

    async fn reconcile(&self, gateway: GatewayName, notice: &SettlementNotice) -> WebhookOutcome {
        let transaction = match self.locate(notice).await {
            Ok(Some(transaction)) => transaction,
            Ok(None) => {
                info!(
                    gateway = %gateway,
                    reference = %notice.reference,
                    "no pending transaction for webhook reference"
                );
                return WebhookOutcome::NotFound;
            }
            Err(e) => {
                error!(
                    gateway = %gateway,
                    reference = %notice.reference,
                    error = %e,
                    "transaction lookup failed"
                );
                return WebhookOutcome::Error;
            }
        };

        match self.ledger.finalize(&transaction, &notice.amount_paid).await {
            Ok(FinalizeResult::Completed { transaction, user }) => {
                info!(
                    gateway = %gateway,
                    transaction_id = transaction.id,
                    external_id = notice.external_id.as_deref().unwrap_or_default(),
                    "payment confirmed by webhook"
                );
                self.notify(&transaction, &user).await;
                WebhookOutcome::Processed
            }
            Ok(FinalizeResult::AlreadyCompleted) => WebhookOutcome::AlreadyProcessed,
            Ok(FinalizeResult::AmountMismatch { .. }) => WebhookOutcome::AmountMismatch,
            Err(e) => {
                error!(
                    gateway = %gateway,
                    transaction_id = transaction.id,
                    error = %e,
                    "failed to finalize transaction"
                );
                WebhookOutcome::Error
            }
        }
    }

    /// Pending transaction for the notice. A re-delivery for a charge that is
    /// already completed is recognised through its exact txid.
    async fn locate(&self, notice: &SettlementNotice) -> Result<Option<Transaction>, LedgerError> {
        if let Some(pending) = self.ledger.find_pending_by_reference(&notice.reference).await? {
            return Ok(Some(pending));
        }

        Ok(self
            .ledger
            .find_by_correlation_id(&notice.reference)
            .await?
            .filter(|t| t.status == TransactionStatus::Completed))
    }

    /// Best effort: the credit is already committed whatever happens here.
    async fn notify(&self, transaction: &Transaction, user: &User) {
        let message = self
            .resolver
            .confirmation_for(transaction, user.first_name.as_deref())
            .await;

        let Err(e) = self.notifier.send(user.telegram_id, &message).await else {
            return;
        };

        warn!(
            transaction_id = transaction.id,
            chat_id = user.telegram_id,
            error = %e,
            "confirmation message not delivered"
        );

        match &self.retry_queue {
            Some(queue) if e.is_retryable() => {
                queue
                    .enqueue(PendingNotification {
                        chat_id: user.telegram_id,
                        transaction_id: transaction.id,
                        message,
                        attempts: 1,
                    })
                    .await;
            }
            _ => error!(
                transaction_id = transaction.id,
                chat_id = user.telegram_id,
                "confirmation message dropped"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_serialize_as_snake_case() {
        for outcome in [
            WebhookOutcome::Processed,
            WebhookOutcome::AlreadyProcessed,
            WebhookOutcome::Ignored,
            WebhookOutcome::NotFound,
            WebhookOutcome::AmountMismatch,
            WebhookOutcome::Rejected,
            WebhookOutcome::Error,
        ] {
            assert_eq!(
                serde_json::to_value(outcome).unwrap(),
                serde_json::json!(outcome.as_str())
            );
        }
    }
}
