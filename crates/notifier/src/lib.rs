//! Notification delivery channels.
//!
//! The scan runner hands a fully formatted message to a `NotificationChannel`.
//! Channels only deliver; they never decide whether a subscriber should be
//! notified.

pub mod log;
pub mod twilio;

use async_trait::async_trait;

use curbside_common::error::AppError;
use curbside_common::types::Subscriber;

pub use log::LogChannel;
pub use twilio::{TwilioConfig, TwilioSmsChannel};

/// Proof that a channel accepted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Channel that accepted the message
    pub channel: &'static str,
    /// Provider-side message identifier, when the provider returns one
    pub message_id: Option<String>,
}

/// A delivery channel for subscriber notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver `message` to the subscriber's contact address.
    async fn send(&self, subscriber: &Subscriber, message: &str)
    -> Result<DeliveryReceipt, AppError>;

    /// Short channel name used in logs (e.g., "twilio_sms").
    fn name(&self) -> &'static str;
}
