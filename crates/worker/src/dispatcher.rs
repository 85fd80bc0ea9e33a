use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use curbside_common::types::Chain;
use curbside_engine::runner::{ChainScanRunner, ScanServices};

/// Periodically starts one scan run per chain.
///
/// Runs for different chains proceed in parallel, bounded by `max_workers`.
/// A chain whose previous run is still in flight on this process is skipped
/// for the tick; across processes the chain lock does the same job.
pub struct ScanDispatcher {
    services: Arc<ScanServices>,
    interval: Duration,
    permits: Arc<Semaphore>,
    in_flight: HashMap<Uuid, JoinHandle<()>>,
}

impl ScanDispatcher {
    pub fn new(services: Arc<ScanServices>, interval: Duration, max_workers: usize) -> Self {
        Self {
            services,
            interval,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            in_flight: HashMap::new(),
        }
    }

    /// Number of chain runs spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Dispatch on every tick. Runs until the task is cancelled.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            max_workers = self.permits.available_permits(),
            "Scan dispatcher started"
        );

        loop {
            ticker.tick().await;

            if let Err(err) = self.dispatch().await {
                tracing::error!(error = %format!("{:#}", err), "Dispatch tick failed");
                self.services.reporter.report(&err);
            }
        }
    }

    /// Spawn a run for every chain without one in flight. Returns how many were spawned.
    pub async fn dispatch(&mut self) -> anyhow::Result<usize> {
        self.reap().await;

        let chains = self
            .services
            .repository
            .list_chains()
            .await
            .context("failed to list chains")?;

        let mut spawned = 0;
        for chain in chains {
            if self.in_flight.contains_key(&chain.id) {
                tracing::debug!(chain = %chain.slug, "Previous scan still running, skipping");
                continue;
            }

            let chain_id = chain.id;
            let services = self.services.clone();
            let permits = self.permits.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                run_chain(services, chain).await;
            });

            self.in_flight.insert(chain_id, handle);
            spawned += 1;
        }

        tracing::debug!(spawned, in_flight = self.in_flight.len(), "Dispatch tick complete");
        Ok(spawned)
    }

    /// Wait for every in-flight run to finish.
    pub async fn drain(&mut self) {
        let handles: Vec<(Uuid, JoinHandle<()>)> = self.in_flight.drain().collect();
        if !handles.is_empty() {
            tracing::info!(runs = handles.len(), "Waiting for in-flight scans");
        }
        for (chain_id, handle) in handles {
            self.join(chain_id, handle).await;
        }
    }

    /// Forget finished tasks, logging any that panicked.
    async fn reap(&mut self) {
        let finished: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(chain_id, _)| *chain_id)
            .collect();

        for chain_id in finished {
            if let Some(handle) = self.in_flight.remove(&chain_id) {
                self.join(chain_id, handle).await;
            }
        }
    }

    async fn join(&self, chain_id: Uuid, handle: JoinHandle<()>) {
        let Err(join_err) = handle.await else {
            return;
        };

        let err = anyhow::anyhow!("scan task for chain {} did not complete: {}", chain_id, join_err);
        tracing::error!(chain_id = %chain_id, panicked = join_err.is_panic(), error = %err, "Scan task aborted");
        self.services.reporter.report(&err);
    }
}

async fn run_chain(services: Arc<ScanServices>, chain: Chain) {
    let runner = match ChainScanRunner::enqueue(services.clone(), chain.clone()).await {
        Ok(runner) => runner,
        Err(err) => {
            let err = anyhow::Error::new(err)
                .context(format!("failed to enqueue scan run for chain {}", chain.name));
            tracing::error!(chain = %chain.slug, error = %format!("{:#}", err), "Scan not started");
            services.reporter.report(&err);
            return;
        }
    };

    let record = runner.run().await;
    tracing::debug!(
        run_id = %record.id,
        chain = %chain.slug,
        status = %record.status,
        "Scan run finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use curbside_common::error::AppError;
    use curbside_common::geo::Haversine;
    use curbside_common::types::{RunRecord, RunStatus, Store, Subscriber, Timeslot};
    use curbside_engine::clock::FixedClock;
    use curbside_engine::lock::{ChainLock, LockToken};
    use curbside_engine::reporter::TracingReporter;
    use curbside_engine::repository::ScanRepository;
    use curbside_engine::runner::{LockMode, RunnerSettings};
    use curbside_notifier::LogChannel;
    use curbside_scanners::{ScannerRegistry, StoreScanner};

    struct ChainsOnly {
        chains: Vec<Chain>,
        runs: Mutex<HashMap<Uuid, RunRecord>>,
    }

    #[async_trait]
    impl ScanRepository for ChainsOnly {
        async fn list_chains(&self) -> Result<Vec<Chain>, AppError> {
            Ok(self.chains.clone())
        }

        async fn insert_run(&self, run: &RunRecord) -> Result<(), AppError> {
            self.runs.lock().unwrap().insert(run.id, run.clone());
            Ok(())
        }

        async fn update_run(&self, run: &RunRecord) -> Result<(), AppError> {
            self.runs.lock().unwrap().insert(run.id, run.clone());
            Ok(())
        }

        async fn stores_with_active_subscribers(&self, _: Uuid) -> Result<Vec<Store>, AppError> {
            Ok(vec![])
        }

        async fn active_subscribers(&self) -> Result<Vec<Subscriber>, AppError> {
            Ok(vec![])
        }

        async fn pause_subscriber(&self, _: Uuid) -> Result<bool, AppError> {
            Ok(false)
        }
    }

    struct UnusedLock;

    #[async_trait]
    impl ChainLock for UnusedLock {
        async fn try_acquire(&self, _: &str, _: Duration) -> Result<Option<LockToken>, AppError> {
            Err(AppError::Internal("lock must not be used in bypass mode".to_string()))
        }

        async fn release(&self, _: LockToken) -> Result<(), AppError> {
            Ok(())
        }
    }

    /// Blocks every scan until the gate has a permit.
    struct GatedScanner {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl StoreScanner for GatedScanner {
        async fn scan(&self, _: &[Store]) -> Result<Vec<Timeslot>, AppError> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| AppError::Scan(e.to_string()))?;
            Ok(vec![])
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    fn chain(slug: &str) -> Chain {
        Chain {
            id: Uuid::new_v4(),
            name: slug.to_uppercase(),
            slug: slug.to_string(),
        }
    }

    fn dispatcher(chains: Vec<Chain>, gate: Arc<Semaphore>) -> (ScanDispatcher, Arc<ChainsOnly>) {
        let repository = Arc::new(ChainsOnly {
            chains: chains.clone(),
            runs: Mutex::new(HashMap::new()),
        });

        let mut scanners = ScannerRegistry::new();
        for chain in &chains {
            scanners.register(&chain.slug, Arc::new(GatedScanner { gate: gate.clone() }));
        }

        let now = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();

        let services = Arc::new(ScanServices {
            repository: repository.clone(),
            lock: Arc::new(UnusedLock),
            scanners: Arc::new(scanners),
            channel: Arc::new(LogChannel),
            reporter: Arc::new(TracingReporter),
            clock: Arc::new(FixedClock::new(now)),
            distance: Arc::new(Haversine),
            settings: RunnerSettings {
                lock_mode: LockMode::Bypass,
                lock_ttl: Duration::from_secs(600),
                hostname: "test-host".to_string(),
                preferences_url: "https://curb.run".to_string(),
            },
        });

        (
            ScanDispatcher::new(services, Duration::from_secs(300), 2),
            repository,
        )
    }

    #[tokio::test]
    async fn test_dispatch_starts_one_run_per_chain() {
        let gate = Arc::new(Semaphore::new(Semaphore::MAX_PERMITS));
        let (mut dispatcher, repository) = dispatcher(vec![chain("giant"), chain("weis")], gate);

        assert_eq!(dispatcher.dispatch().await.unwrap(), 2);
        dispatcher.drain().await;
        assert_eq!(dispatcher.in_flight(), 0);

        let runs = repository.runs.lock().unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.values().all(|run| run.status == RunStatus::Succeeded));
        assert!(
            runs.values()
                .all(|run| run.hostname.as_deref() == Some("test-host"))
        );
    }

    #[tokio::test]
    async fn test_dispatch_skips_chain_still_running() {
        let gate = Arc::new(Semaphore::new(0));
        let (mut dispatcher, repository) = dispatcher(vec![chain("giant")], gate.clone());

        assert_eq!(dispatcher.dispatch().await.unwrap(), 1);
        assert_eq!(dispatcher.dispatch().await.unwrap(), 0);
        assert_eq!(dispatcher.in_flight(), 1);

        gate.add_permits(1);
        dispatcher.drain().await;
        assert_eq!(repository.runs.lock().unwrap().len(), 1);

        assert_eq!(dispatcher.dispatch().await.unwrap(), 1);
        gate.add_permits(1);
        dispatcher.drain().await;
        assert_eq!(repository.runs.lock().unwrap().len(), 2);
    }
}
