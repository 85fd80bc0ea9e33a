//! Persistence for chains, stores, subscribers and scan run records.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use curbside_common::error::AppError;
use curbside_common::types::{Chain, RunRecord, Store, Subscriber, SubscriberStatus};

/// Queries and writes a scan run needs from the database.
#[async_trait]
pub trait ScanRepository: Send + Sync {
    /// All chains, in a stable order.
    async fn list_chains(&self) -> Result<Vec<Chain>, AppError>;

    /// Persist a freshly enqueued run record.
    async fn insert_run(&self, run: &RunRecord) -> Result<(), AppError>;

    /// Overwrite the mutable fields of an existing run record.
    async fn update_run(&self, run: &RunRecord) -> Result<(), AppError>;

    /// Stores of `chain_id` watched by at least one active subscriber.
    async fn stores_with_active_subscribers(&self, chain_id: Uuid)
    -> Result<Vec<Store>, AppError>;

    /// Every active subscriber with their store ids, ordered by id.
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>, AppError>;

    /// Move an active subscriber to `PAUSED`.
    ///
    /// Returns `false` if the subscriber was no longer active, in which case
    /// the caller must not notify them.
    async fn pause_subscriber(&self, subscriber_id: Uuid) -> Result<bool, AppError>;
}

const RUN_COLUMNS: &str = "id, chain_id, status, hostname, duration_seconds, stores_scanned, \
     timeslots_found, subscribers_notified, deliveries_failed, error_message, \
     started_at, finished_at, created_at";

/// PostgreSQL implementation of `ScanRepository`.
#[derive(Clone)]
pub struct PgScanRepository {
    pool: PgPool,
}

impl PgScanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a single run record by id.
    pub async fn get_run(&self, run_id: Uuid) -> Result<RunRecord, AppError> {
        let run: RunRecord =
            sqlx::query_as(&format!("SELECT {} FROM scanner_runs WHERE id = $1", RUN_COLUMNS))
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Scanner run {} not found", run_id)))?;

        Ok(run)
    }

    /// Most recent runs for a chain, newest first.
    pub async fn recent_runs(&self, chain_id: Uuid, limit: i64) -> Result<Vec<RunRecord>, AppError> {
        let runs: Vec<RunRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM scanner_runs WHERE chain_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
            RUN_COLUMNS
        ))
        .bind(chain_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }
}

#[async_trait]
impl ScanRepository for PgScanRepository {
    async fn list_chains(&self) -> Result<Vec<Chain>, AppError> {
        let chains: Vec<Chain> = sqlx::query_as("SELECT id, name, slug FROM chains ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;

        Ok(chains)
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO scanner_runs (
                id, chain_id, status, hostname, duration_seconds, stores_scanned,
                timeslots_found, subscribers_notified, deliveries_failed, error_message,
                started_at, finished_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(run.id)
        .bind(run.chain_id)
        .bind(run.status.to_string())
        .bind(&run.hostname)
        .bind(run.duration_seconds)
        .bind(run.stores_scanned)
        .bind(run.timeslots_found)
        .bind(run.subscribers_notified)
        .bind(run.deliveries_failed)
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_run(&self, run: &RunRecord) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scanner_runs
            SET status = $2, hostname = $3, duration_seconds = $4, stores_scanned = $5,
                timeslots_found = $6, subscribers_notified = $7, deliveries_failed = $8,
                error_message = $9, started_at = $10, finished_at = $11
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.to_string())
        .bind(&run.hostname)
        .bind(run.duration_seconds)
        .bind(run.stores_scanned)
        .bind(run.timeslots_found)
        .bind(run.subscribers_notified)
        .bind(run.deliveries_failed)
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Scanner run {} not found", run.id)));
        }

        Ok(())
    }

    async fn stores_with_active_subscribers(
        &self,
        chain_id: Uuid,
    ) -> Result<Vec<Store>, AppError> {
        let stores: Vec<Store> = sqlx::query_as(
            r#"
            SELECT st.id, st.chain_id, st.name, st.external_id, st.latitude, st.longitude
            FROM stores st
            WHERE st.chain_id = $1
              AND EXISTS (
                  SELECT 1
                  FROM subscriber_stores ss
                  JOIN subscribers s ON s.id = ss.subscriber_id
                  WHERE ss.store_id = st.id
                    AND s.status = $2
              )
            ORDER BY st.name, st.id
            "#,
        )
        .bind(chain_id)
        .bind(SubscriberStatus::Active.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(stores)
    }

    async fn active_subscribers(&self) -> Result<Vec<Subscriber>, AppError> {
        let subscribers: Vec<Subscriber> = sqlx::query_as(
            r#"
            SELECT s.id, s.phone, s.status, s.criteria, s.latitude, s.longitude, s.created_at,
                   COALESCE(
                       array_agg(ss.store_id ORDER BY ss.store_id)
                           FILTER (WHERE ss.store_id IS NOT NULL),
                       ARRAY[]::uuid[]
                   ) AS store_ids
            FROM subscribers s
            LEFT JOIN subscriber_stores ss ON ss.subscriber_id = s.id
            WHERE s.status = $1
            GROUP BY s.id
            ORDER BY s.id
            "#,
        )
        .bind(SubscriberStatus::Active.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(subscribers)
    }

    async fn pause_subscriber(&self, subscriber_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE subscribers
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(subscriber_id)
        .bind(SubscriberStatus::Paused.to_string())
        .bind(SubscriberStatus::Active.to_string())
        .execute(&self.pool)
        .await?;

        let paused = result.rows_affected() > 0;
        if paused {
            tracing::info!(subscriber_id = %subscriber_id, "Subscriber paused");
        }

        Ok(paused)
    }
}
