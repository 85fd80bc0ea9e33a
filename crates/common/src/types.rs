use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// A retailer whose stores are scanned for pickup availability.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chain {
    pub id: Uuid,
    pub name: String,
    /// Selects the chain's store scanner in the scanner registry.
    pub slug: String,
}

/// A physical store belonging to one chain.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Store {
    pub id: Uuid,
    pub chain_id: Uuid,
    pub name: String,
    /// The chain's own identifier for this store (store number, location code).
    pub external_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Lifecycle of a subscriber's notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriberStatus {
    Active,
    Paused,
    Unsubscribed,
}

impl std::fmt::Display for SubscriberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriberStatus::Active => write!(f, "ACTIVE"),
            SubscriberStatus::Paused => write!(f, "PAUSED"),
            SubscriberStatus::Unsubscribed => write!(f, "UNSUBSCRIBED"),
        }
    }
}

/// A subscriber's time-window preference.
///
/// Stored as free text; values other than the three known ones decode to
/// `Unrecognized` and never match a timeslot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Criterion {
    Anytime,
    Soon,
    Today,
    Unrecognized(String),
}

impl From<String> for Criterion {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ANYTIME" => Criterion::Anytime,
            "SOON" => Criterion::Soon,
            "TODAY" => Criterion::Today,
            _ => Criterion::Unrecognized(value),
        }
    }
}

impl From<Criterion> for String {
    fn from(value: Criterion) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criterion::Anytime => write!(f, "ANYTIME"),
            Criterion::Soon => write!(f, "SOON"),
            Criterion::Today => write!(f, "TODAY"),
            Criterion::Unrecognized(raw) => write!(f, "{}", raw),
        }
    }
}

/// An end-user watching a set of stores for pickup slots.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscriber {
    pub id: Uuid,
    pub phone: String,
    pub status: SubscriberStatus,
    #[sqlx(try_from = "String")]
    pub criteria: Criterion,
    pub latitude: f64,
    pub longitude: f64,
    /// Stores this subscriber watches (aggregated from `subscriber_stores`).
    pub store_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn is_subscribed_to(&self, store_id: Uuid) -> bool {
        self.store_ids.contains(&store_id)
    }
}

/// An available pickup window at a store. Produced fresh by every scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeslot {
    pub store_id: Uuid,
    pub date: NaiveDate,
    pub from: NaiveTime,
    pub to: NaiveTime,
}

impl Timeslot {
    /// The local instant at which the slot opens.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.from)
    }
}

/// Scan run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Enqueued,
    Started,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Enqueued => write!(f, "ENQUEUED"),
            RunStatus::Started => write!(f, "STARTED"),
            RunStatus::Succeeded => write!(f, "SUCCEEDED"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Counters collected by a successful scan run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub stores_scanned: i32,
    pub timeslots_found: i32,
    pub subscribers_notified: i32,
    pub deliveries_failed: i32,
}

/// Audit record for one execution of a chain scan.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunRecord {
    pub id: Uuid,
    pub chain_id: Uuid,
    pub status: RunStatus,
    pub hostname: Option<String>,
    pub duration_seconds: Option<i64>,
    pub stores_scanned: Option<i32>,
    pub timeslots_found: Option<i32>,
    pub subscribers_notified: Option<i32>,
    pub deliveries_failed: Option<i32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    /// A fresh record in `ENQUEUED` status.
    pub fn enqueued(chain_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id,
            status: RunStatus::Enqueued,
            hostname: None,
            duration_seconds: None,
            stores_scanned: None,
            timeslots_found: None,
            subscribers_notified: None,
            deliveries_failed: None,
            error_message: None,
            started_at: None,
            finished_at: None,
            created_at: at,
        }
    }

    /// `ENQUEUED → STARTED`.
    pub fn start(&mut self, hostname: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(RunStatus::Started, &[RunStatus::Enqueued])?;
        self.hostname = Some(hostname.to_string());
        self.started_at = Some(at);
        Ok(())
    }

    /// `STARTED → SUCCEEDED`, recording duration and counters.
    pub fn succeed(&mut self, metrics: RunMetrics, at: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(RunStatus::Succeeded, &[RunStatus::Started])?;
        self.duration_seconds = Some(self.elapsed_seconds(at));
        self.stores_scanned = Some(metrics.stores_scanned);
        self.timeslots_found = Some(metrics.timeslots_found);
        self.subscribers_notified = Some(metrics.subscribers_notified);
        self.deliveries_failed = Some(metrics.deliveries_failed);
        self.finished_at = Some(at);
        Ok(())
    }

    /// `ENQUEUED | STARTED → FAILED`, recording duration and error detail.
    pub fn fail(&mut self, error_message: String, at: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(RunStatus::Failed, &[RunStatus::Enqueued, RunStatus::Started])?;
        self.duration_seconds = Some(self.elapsed_seconds(at));
        self.error_message = Some(error_message);
        self.finished_at = Some(at);
        Ok(())
    }

    fn transition(&mut self, to: RunStatus, allowed_from: &[RunStatus]) -> Result<(), AppError> {
        if !allowed_from.contains(&self.status) {
            return Err(AppError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn elapsed_seconds(&self, at: DateTime<Utc>) -> i64 {
        let since = self.started_at.unwrap_or(self.created_at);
        (at - since).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_criterion_parses_known_values() {
        assert_eq!(Criterion::from("ANYTIME".to_string()), Criterion::Anytime);
        assert_eq!(Criterion::from("SOON".to_string()), Criterion::Soon);
        assert_eq!(Criterion::from("TODAY".to_string()), Criterion::Today);
    }

    #[test]
    fn test_criterion_keeps_unrecognized_value() {
        let criterion = Criterion::from("tomorrow".to_string());
        assert_eq!(criterion, Criterion::Unrecognized("tomorrow".to_string()));
        assert_eq!(criterion.to_string(), "tomorrow");
    }

    #[test]
    fn test_criterion_serde_uses_plain_strings() {
        let json = serde_json::to_string(&Criterion::Soon).unwrap();
        assert_eq!(json, "\"SOON\"");
        let back: Criterion = serde_json::from_str("\"LATER\"").unwrap();
        assert_eq!(back, Criterion::Unrecognized("LATER".to_string()));
    }

    #[test]
    fn test_run_record_success_path() {
        let created = Utc::now();
        let mut run = RunRecord::enqueued(Uuid::new_v4(), created);
        assert_eq!(run.status, RunStatus::Enqueued);

        run.start("worker-1", created).unwrap();
        assert_eq!(run.status, RunStatus::Started);
        assert_eq!(run.hostname.as_deref(), Some("worker-1"));

        let metrics = RunMetrics {
            stores_scanned: 4,
            timeslots_found: 9,
            subscribers_notified: 2,
            deliveries_failed: 0,
        };
        run.succeed(metrics, created + Duration::seconds(42)).unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.duration_seconds, Some(42));
        assert_eq!(run.stores_scanned, Some(4));
        assert_eq!(run.timeslots_found, Some(9));
        assert_eq!(run.subscribers_notified, Some(2));
        assert!(run.error_message.is_none());
    }

    #[test]
    fn test_run_record_fail_from_enqueued() {
        let created = Utc::now();
        let mut run = RunRecord::enqueued(Uuid::new_v4(), created);
        run.fail("boom".to_string(), created + Duration::seconds(3))
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.duration_seconds, Some(3));
        assert_eq!(run.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_terminal_run_record_is_immutable() {
        let now = Utc::now();
        let mut run = RunRecord::enqueued(Uuid::new_v4(), now);
        run.start("host", now).unwrap();
        run.fail("first".to_string(), now).unwrap();

        let err = run.fail("second".to_string(), now).unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: RunStatus::Failed,
                to: RunStatus::Failed,
                ..
            }
        ));
        assert!(run.succeed(RunMetrics::default(), now).is_err());
        assert!(run.start("host", now).is_err());
        assert_eq!(run.error_message.as_deref(), Some("first"));
    }

    #[test]
    fn test_succeed_requires_started() {
        let now = Utc::now();
        let mut run = RunRecord::enqueued(Uuid::new_v4(), now);
        assert!(run.succeed(RunMetrics::default(), now).is_err());
        assert_eq!(run.status, RunStatus::Enqueued);
    }
}
