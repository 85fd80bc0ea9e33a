use async_trait::async_trait;

use curbside_common::error::AppError;
use curbside_common::types::Subscriber;

use crate::{DeliveryReceipt, NotificationChannel};

/// Writes notifications to the log instead of delivering them.
///
/// Used for local development when no SMS credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(
        &self,
        subscriber: &Subscriber,
        message: &str,
    ) -> Result<DeliveryReceipt, AppError> {
        tracing::info!(
            subscriber_id = %subscriber.id,
            phone = %subscriber.phone,
            body = %message,
            "Notification (log channel)"
        );

        Ok(DeliveryReceipt {
            channel: self.name(),
            message_id: None,
        })
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
