//! Notification sink for a headless station: every alert becomes a log line.

use async_trait::async_trait;
use sync_engine::{Notification, Notifier, NotifyError, Permission};
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    async fn schedule(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            key = %notification.dedup_key,
            title = %notification.title,
            "Notification: {}",
            notification.body
        );
        Ok(())
    }
}
