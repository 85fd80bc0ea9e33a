//! HTTP availability scanner.
//!
//! Talks to a chain availability service that exposes one endpoint per store:
//!
//! ```text
//! GET {base_url}/stores/{external_id}/timeslots
//! [{"date": "2026-10-19", "from": "09:00", "to": "10:00"}, ...]
//! ```
//!
//! Times may be given as `HH:MM` or `HH:MM:SS`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

use curbside_common::error::AppError;
use curbside_common::types::{Store, Timeslot};

use crate::StoreScanner;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One slot as returned by the availability service.
#[derive(Debug, Deserialize)]
struct SlotResponse {
    date: NaiveDate,
    from: String,
    to: String,
}

/// Scanner backed by a JSON availability service.
pub struct HttpStoreScanner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStoreScanner {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn scan_store(&self, store: &Store) -> Result<Vec<Timeslot>, AppError> {
        let url = format!("{}/stores/{}/timeslots", self.base_url, store.external_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Scan(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Scan(format!(
                "Store {} ({}) returned HTTP {}",
                store.name, store.external_id, status
            )));
        }

        let slots: Vec<SlotResponse> = response.json().await.map_err(|e| {
            AppError::Scan(format!(
                "Invalid timeslot payload for store {}: {}",
                store.external_id, e
            ))
        })?;

        slots
            .into_iter()
            .map(|slot| {
                Ok(Timeslot {
                    store_id: store.id,
                    date: slot.date,
                    from: parse_time(&slot.from)?,
                    to: parse_time(&slot.to)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl StoreScanner for HttpStoreScanner {
    async fn scan(&self, stores: &[Store]) -> Result<Vec<Timeslot>, AppError> {
        let mut timeslots = Vec::new();

        for store in stores {
            let found = self.scan_store(store).await?;
            tracing::debug!(
                store_id = %store.id,
                external_id = %store.external_id,
                timeslots = found.len(),
                "Scanned store"
            );
            timeslots.extend(found);
        }

        Ok(timeslots)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, AppError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| AppError::Scan(format!("Invalid time of day '{}'", raw)))
}
