//! Notification sink that reports recovery outcomes through `tracing`

use async_trait::async_trait;
use scribeflow_common::ServiceError;
use scribeflow_core::{NotificationSink, RecoveryNotification};
use tracing::{info, warn};

/// Writes every recovery notification to the log. Notifications that need
/// a user are logged at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, notification: &RecoveryNotification) -> Result<(), ServiceError> {
        let retry_after = notification.retry_after.map(|at| at.to_rfc3339());
        if notification.user_action_required {
            warn!(
                job_id = %notification.job_id,
                strategy = %notification.strategy,
                category = %notification.category,
                suggestion = %notification.suggestion,
                "Job needs attention: {}",
                notification.message
            );
        } else {
            info!(
                job_id = %notification.job_id,
                strategy = %notification.strategy,
                category = %notification.category,
                retry_after = ?retry_after,
                "Recovery update: {}",
                notification.message
            );
        }
        Ok(())
    }
}
