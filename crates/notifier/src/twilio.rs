//! SMS delivery through the Twilio Messages API.
//!
//! `POST {base}/2010-04-01/Accounts/{sid}/Messages.json` with HTTP basic auth
//! and a form-encoded `To` / `From` / `Body`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use curbside_common::config::AppConfig;
use curbside_common::error::AppError;
use curbside_common::types::Subscriber;

use crate::{DeliveryReceipt, NotificationChannel};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Twilio credentials and sender number.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

impl TwilioConfig {
    /// Extract Twilio settings, or `None` when any of them is missing.
    pub fn from_app_config(config: &AppConfig) -> Option<Self> {
        Some(Self {
            account_sid: config.twilio_account_sid.clone()?,
            auth_token: config.twilio_auth_token.clone()?,
            from_number: config.twilio_from_number.clone()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    code: Option<i64>,
    message: String,
}

/// Twilio SMS channel.
pub struct TwilioSmsChannel {
    client: reqwest::Client,
    config: TwilioConfig,
    base_url: String,
}

impl TwilioSmsChannel {
    pub fn new(config: TwilioConfig) -> Result<Self, AppError> {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Point the channel at a different API host (tests, proxies).
    pub fn with_base_url(config: TwilioConfig, base_url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.config.account_sid
        )
    }
}

#[async_trait]
impl NotificationChannel for TwilioSmsChannel {
    async fn send(
        &self,
        subscriber: &Subscriber,
        message: &str,
    ) -> Result<DeliveryReceipt, AppError> {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", subscriber.phone.as_str()),
                ("From", self.config.from_number.as_str()),
                ("Body", message),
            ])
            .send()
            .await
            .map_err(|e| AppError::Delivery(format!("Twilio request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<ErrorResponse>().await {
                Ok(err) => match err.code {
                    Some(code) => format!("{} (code {})", err.message, code),
                    None => err.message,
                },
                Err(_) => "no error body".to_string(),
            };
            return Err(AppError::Delivery(format!(
                "Twilio rejected message to subscriber {} with HTTP {}: {}",
                subscriber.id, status, detail
            )));
        }

        let body: MessageResponse = response
            .json()
            .await
            .map_err(|e| AppError::Delivery(format!("Invalid Twilio response: {}", e)))?;

        tracing::debug!(
            subscriber_id = %subscriber.id,
            message_sid = %body.sid,
            "SMS accepted by Twilio"
        );

        Ok(DeliveryReceipt {
            channel: self.name(),
            message_id: Some(body.sid),
        })
    }

    fn name(&self) -> &'static str {
        "twilio_sms"
    }
}
