//! Chain scan runner.
//!
//! One runner handles one run for one chain:
//! 1. Persist a run record (`ENQUEUED`) when the runner is created
//! 2. Mark it `STARTED` and take the chain's scan lock
//! 3. Scan the chain's watched stores for timeslots
//! 4. Match every active subscriber; pause and notify each one that matched
//! 5. Finish the record as `SUCCEEDED` or `FAILED`, then release the lock
//!
//! A run never returns an error to its caller. Failures end up on the run
//! record and go to the `ErrorReporter`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use uuid::Uuid;

use curbside_common::config::AppConfig;
use curbside_common::error::AppError;
use curbside_common::geo::DistanceCalculator;
use curbside_common::types::{Chain, RunMetrics, RunRecord, Store, Subscriber, Timeslot};
use curbside_notifier::NotificationChannel;
use curbside_scanners::ScannerRegistry;

use crate::clock::Clock;
use crate::formatter::NotificationFormatter;
use crate::lock::{ChainLock, LockToken, chain_scan_lock_key};
use crate::matcher::TimeslotMatcher;
use crate::reporter::ErrorReporter;
use crate::repository::ScanRepository;

/// Whether a run must hold the chain lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Take the per-chain lock; fail the run if it is held elsewhere.
    Exclusive,
    /// Skip locking entirely. Local development only: runs may overlap.
    Bypass,
}

/// Per-process settings shared by every run.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub lock_mode: LockMode,
    pub lock_ttl: Duration,
    pub hostname: String,
    pub preferences_url: String,
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lock_mode: if config.is_local() {
                LockMode::Bypass
            } else {
                LockMode::Exclusive
            },
            lock_ttl: Duration::from_secs(config.scan_lock_ttl_secs),
            hostname: config.hostname.clone(),
            preferences_url: config.preferences_url.clone(),
        }
    }
}

/// Collaborators a run talks to.
#[derive(Clone)]
pub struct ScanServices {
    pub repository: Arc<dyn ScanRepository>,
    pub lock: Arc<dyn ChainLock>,
    pub scanners: Arc<ScannerRegistry>,
    pub channel: Arc<dyn NotificationChannel>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub clock: Arc<dyn Clock>,
    pub distance: Arc<dyn DistanceCalculator>,
    pub settings: RunnerSettings,
}

/// Executes one scan-and-notify run for a chain.
pub struct ChainScanRunner {
    services: Arc<ScanServices>,
    chain: Chain,
    run: RunRecord,
    matcher: TimeslotMatcher,
}

impl ChainScanRunner {
    /// Create the runner and persist its run record as `ENQUEUED`.
    pub async fn enqueue(services: Arc<ScanServices>, chain: Chain) -> Result<Self, AppError> {
        let run = RunRecord::enqueued(chain.id, services.clock.utc_now());
        services.repository.insert_run(&run).await?;

        tracing::debug!(run_id = %run.id, chain = %chain.slug, "Scan run enqueued");

        Ok(Self {
            services,
            chain,
            run,
            matcher: TimeslotMatcher::new(),
        })
    }

    pub fn run_record(&self) -> &RunRecord {
        &self.run
    }

    /// Execute the run and return its terminal record.
    pub async fn run(mut self) -> RunRecord {
        let mut held: Option<LockToken> = None;

        if let Err(err) = self.execute(&mut held).await {
            self.record_failure(err).await;
        }

        self.release_lock(held).await;
        self.run
    }

    async fn execute(&mut self, held: &mut Option<LockToken>) -> anyhow::Result<()> {
        let hostname = self.services.settings.hostname.clone();
        let started_at = self.services.clock.utc_now();
        self.commit(|run| run.start(&hostname, started_at))
            .await
            .context("failed to mark run as started")?;

        match self.services.settings.lock_mode {
            LockMode::Bypass => {
                tracing::warn!(
                    chain = %self.chain.slug,
                    "Not acquiring chain scan lock, concurrent runs are possible"
                );
            }
            LockMode::Exclusive => {
                let key = chain_scan_lock_key(self.chain.id);
                let token = self
                    .services
                    .lock
                    .try_acquire(&key, self.services.settings.lock_ttl)
                    .await
                    .with_context(|| format!("failed to request lock {}", key))?;

                match token {
                    Some(token) => *held = Some(token),
                    None => {
                        return Err(AppError::LockUnavailable(format!(
                            "could not get {} for chain {}",
                            key, self.chain.name
                        ))
                        .into());
                    }
                }
            }
        }

        let metrics = self.scan().await?;

        let finished_at = self.services.clock.utc_now();
        self.commit(|run| run.succeed(metrics, finished_at))
            .await
            .context("failed to mark run as succeeded")?;

        tracing::info!(
            run_id = %self.run.id,
            chain = %self.chain.slug,
            stores_scanned = metrics.stores_scanned,
            timeslots_found = metrics.timeslots_found,
            subscribers_notified = metrics.subscribers_notified,
            deliveries_failed = metrics.deliveries_failed,
            duration_seconds = self.run.duration_seconds.unwrap_or_default(),
            "Chain scan succeeded"
        );

        Ok(())
    }

    async fn scan(&self) -> anyhow::Result<RunMetrics> {
        let repository = &self.services.repository;
        let scanner = self.services.scanners.scanner_for(&self.chain)?;

        let stores = repository
            .stores_with_active_subscribers(self.chain.id)
            .await
            .context("failed to load stores with active subscribers")?;

        tracing::info!(
            chain = %self.chain.name,
            stores = stores.len(),
            scanner = scanner.name(),
            "Scanning for timeslots"
        );

        let timeslots = scanner.scan(&stores).await.with_context(|| {
            format!(
                "store scanner '{}' failed for chain {}",
                scanner.name(),
                self.chain.name
            )
        })?;

        let mut subscribers = repository
            .active_subscribers()
            .await
            .context("failed to load active subscribers")?;
        subscribers.sort_by_key(|subscriber| subscriber.id);

        let mut metrics = RunMetrics {
            stores_scanned: count(stores.len()),
            timeslots_found: count(timeslots.len()),
            ..RunMetrics::default()
        };

        let stores: HashMap<Uuid, Store> =
            stores.into_iter().map(|store| (store.id, store)).collect();
        let formatter = NotificationFormatter::new(
            &self.chain,
            &stores,
            self.services.distance.as_ref(),
            &self.services.settings.preferences_url,
        );
        let now = self.services.clock.now();

        for subscriber in &subscribers {
            let matched: Vec<Timeslot> = self
                .matcher
                .match_timeslots(subscriber, &timeslots, now)
                .into_iter()
                .filter(|slot| stores.contains_key(&slot.store_id))
                .collect();
            if matched.is_empty() {
                continue;
            }

            self.notify(subscriber, &matched, &formatter, &mut metrics)
                .await?;
        }

        Ok(metrics)
    }

    /// Pause a matched subscriber, then deliver their notification.
    ///
    /// Only pausing can fail the run; a failed delivery is reported and
    /// counted so the remaining subscribers still get theirs.
    async fn notify(
        &self,
        subscriber: &Subscriber,
        matched: &[Timeslot],
        formatter: &NotificationFormatter<'_>,
        metrics: &mut RunMetrics,
    ) -> anyhow::Result<()> {
        tracing::info!(
            subscriber_id = %subscriber.id,
            timeslots = matched.len(),
            "Found timeslots for subscriber"
        );

        let paused = self
            .services
            .repository
            .pause_subscriber(subscriber.id)
            .await
            .with_context(|| format!("failed to pause subscriber {}", subscriber.id))?;

        if !paused {
            tracing::info!(
                subscriber_id = %subscriber.id,
                "Subscriber no longer active, skipping notification"
            );
            return Ok(());
        }

        let message = formatter.format(subscriber, matched);
        tracing::debug!(subscriber_id = %subscriber.id, body = %message, "Notifying subscriber");

        match self.services.channel.send(subscriber, &message).await {
            Ok(receipt) => {
                metrics.subscribers_notified += 1;
                tracing::info!(
                    subscriber_id = %subscriber.id,
                    channel = receipt.channel,
                    message_id = receipt.message_id.as_deref().unwrap_or("-"),
                    "Subscriber notified"
                );
            }
            Err(err) => {
                metrics.deliveries_failed += 1;
                tracing::warn!(
                    subscriber_id = %subscriber.id,
                    channel = self.services.channel.name(),
                    error = %err,
                    "Notification delivery failed"
                );
                let err = anyhow::Error::new(err)
                    .context(format!("failed to notify subscriber {}", subscriber.id));
                self.services.reporter.report(&err);
            }
        }

        Ok(())
    }

    /// Apply a transition to a copy of the record, persist it, then keep it.
    ///
    /// The in-memory record only changes once the database has the new state.
    async fn commit<F>(&mut self, apply: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut RunRecord) -> Result<(), AppError>,
    {
        let mut next = self.run.clone();
        apply(&mut next)?;
        self.services.repository.update_run(&next).await?;
        self.run = next;
        Ok(())
    }

    async fn record_failure(&mut self, err: anyhow::Error) {
        let kind = err
            .downcast_ref::<AppError>()
            .map(AppError::kind)
            .unwrap_or("internal");

        tracing::error!(
            run_id = %self.run.id,
            chain = %self.chain.slug,
            kind,
            error = %format!("{:#}", err),
            "Chain scan failed"
        );
        self.services.reporter.report(&err);

        let detail = format!("{:#}\n\n{:?}", err, err);
        let failed_at = self.services.clock.utc_now();

        let persisted = self
            .commit(|run| run.fail(detail.clone(), failed_at))
            .await;

        if let Err(persist_err) = persisted {
            let persist_err = persist_err.context(format!(
                "failed to record failure of run {}",
                self.run.id
            ));
            tracing::error!(error = %format!("{:#}", persist_err), "Run record not updated");
            self.services.reporter.report(&persist_err);

            // Keep the returned record truthful even if the database is not.
            if let Err(transition_err) = self.run.fail(detail, failed_at) {
                tracing::warn!(error = %transition_err, "Run record already terminal");
            }
        }
    }

    /// Release the lock if this run took one.
    async fn release_lock(&self, held: Option<LockToken>) {
        let Some(token) = held else {
            return;
        };

        let key = token.key.clone();
        match self.services.lock.release(token).await {
            Ok(()) => tracing::debug!(key = %key, "Chain scan lock released"),
            Err(err) => {
                let err = anyhow::Error::new(err).context(format!("failed to release lock {}", key));
                tracing::warn!(error = %format!("{:#}", err), "Lock release failed");
                self.services.reporter.report(&err);
            }
        }
    }
}

fn count(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}
