pub mod notification_retry;

pub use notification_retry::{NotificationRetryWorker, RetryReport};
