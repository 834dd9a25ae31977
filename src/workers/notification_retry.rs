use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::NotificationConfig;
use crate::services::notification::{NotificationQueue, Notifier};

/// Counts from one retry pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryReport {
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
}

/// Re-sends confirmation messages whose first delivery failed.
///
/// Only the message is retried. The ledger was settled before the message
/// was queued and is never touched again from here.
pub struct NotificationRetryWorker {
    queue: NotificationQueue,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    max_attempts: u32,
}

impl NotificationRetryWorker {
    pub fn new(
        queue: NotificationQueue,
        notifier: Arc<dyn Notifier>,
        config: &NotificationConfig,
    ) -> Self {
        Self {
            queue,
            notifier,
            interval: Duration::from_secs(config.retry_interval_secs),
            max_attempts: config.max_attempts,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_attempts = self.max_attempts,
            "notification retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("notification retry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    let report = self.retry_once().await;
                    if report != RetryReport::default() {
                        info!(
                            delivered = report.delivered,
                            requeued = report.requeued,
                            dropped = report.dropped,
                            "retried pending notifications"
                        );
                    }
                }
            }
        }

        let left = self.queue.len().await;
        if left > 0 {
            warn!(pending = left, "notification retry worker stopped with undelivered messages");
        }
        info!("notification retry worker stopped");
    }

    /// One pass over everything currently queued.
    pub async fn retry_once(&self) -> RetryReport {
        let mut report = RetryReport::default();

        for mut pending in self.queue.drain().await {
            match self.notifier.send(pending.chat_id, &pending.message).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    pending.attempts += 1;
                    if e.is_retryable() && pending.attempts < self.max_attempts {
                        report.requeued += 1;
                        self.queue.enqueue(pending).await;
                    } else {
                        report.dropped += 1;
                        error!(
                            transaction_id = pending.transaction_id,
                            chat_id = pending.chat_id,
                            attempts = pending.attempts,
                            error = %e,
                            "giving up on confirmation message"
                        );
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::resolver::OutboundMessage;
    use crate::services::notification::{NotificationError, PendingNotification};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` sends, then succeeds.
    struct FlakyNotifier {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, _chat_id: i64, _message: &OutboundMessage) -> Result<(), NotificationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(NotificationError::Delivery {
                    message: "timeout".to_string(),
                    retryable: true,
                })
            } else {
                Ok(())
            }
        }
    }

    fn pending(transaction_id: i64) -> PendingNotification {
        PendingNotification {
            chat_id: 5,
            transaction_id,
            message: OutboundMessage::text("paid"),
            attempts: 1,
        }
    }

    fn worker(queue: &NotificationQueue, failures: usize, max_attempts: u32) -> NotificationRetryWorker {
        NotificationRetryWorker::new(
            queue.clone(),
            Arc::new(FlakyNotifier {
                failures,
                calls: AtomicUsize::new(0),
            }),
            &NotificationConfig {
                retry_interval_secs: 1,
                max_attempts,
            },
        )
    }

    #[tokio::test]
    async fn requeues_until_delivered() {
        let queue = NotificationQueue::new();
        queue.enqueue(pending(1)).await;
        let worker = worker(&queue, 1, 5);

        assert_eq!(
            worker.retry_once().await,
            RetryReport { delivered: 0, requeued: 1, dropped: 0 }
        );
        assert_eq!(
            worker.retry_once().await,
            RetryReport { delivered: 1, requeued: 0, dropped: 0 }
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn drops_after_max_attempts() {
        let queue = NotificationQueue::new();
        queue.enqueue(pending(1)).await;
        let worker = worker(&queue, usize::MAX, 2);

        let report = worker.retry_once().await;

        assert_eq!(report.dropped, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let queue = NotificationQueue::new();
        let worker = worker(&queue, 0, 3);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(worker.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
