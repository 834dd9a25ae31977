use crate::flow::resolver::OutboundMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification channel is not running")]
    NotRunning,

    #[error("notification delivery failed: {message}")]
    Delivery { message: String, retryable: bool },
}

impl NotificationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            NotificationError::NotRunning => true,
            NotificationError::Delivery { retryable, .. } => *retryable,
        }
    }
}

/// Delivers messages to a user's chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, message: &OutboundMessage) -> Result<(), NotificationError>;
}

/// Notifier used when no bot is configured: messages are only logged.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, chat_id: i64, message: &OutboundMessage) -> Result<(), NotificationError> {
        info!(
            chat_id,
            text = %message.text,
            buttons = message.buttons.iter().map(Vec::len).sum::<usize>(),
            has_media = message.image_url.is_some() || message.video_url.is_some(),
            "🔔 NOTIFICATION: confirmation message"
        );
        Ok(())
    }
}

/// A confirmation that could not be delivered on the first try.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotification {
    pub chat_id: i64,
    pub transaction_id: i64,
    pub message: OutboundMessage,
    /// Deliveries tried so far
    pub attempts: u32,
}

/// Confirmations waiting for another delivery attempt.
///
/// Only messages live here. Nothing in the queue refers back to the ledger
/// beyond the transaction id used in logs.
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    inner: Arc<Mutex<VecDeque<PendingNotification>>>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, notification: PendingNotification) {
        self.inner.lock().await.push_back(notification);
    }

    /// Take everything queued so far.
    pub async fn drain(&self) -> Vec<PendingNotification> {
        self.inner.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_always_delivers() {
        let notifier = LogNotifier;
        assert!(notifier
            .send(42, &OutboundMessage::text("hello"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn queue_drains_in_order() {
        let queue = NotificationQueue::new();
        for id in 1..=3 {
            queue
                .enqueue(PendingNotification {
                    chat_id: 10,
                    transaction_id: id,
                    message: OutboundMessage::text("paid"),
                    attempts: 1,
                })
                .await;
        }

        let drained = queue.clone().drain().await;
        assert_eq!(
            drained.iter().map(|n| n.transaction_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(queue.is_empty().await);
    }

    #[test]
    fn retryability() {
        assert!(NotificationError::NotRunning.is_retryable());
        assert!(!NotificationError::Delivery {
            message: "chat not found".to_string(),
            retryable: false,
        }
        .is_retryable());
    }
}
