//! Background task running the sweep on an interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::enrichment::EnrichmentError;

use super::backfill::BackfillReport;
use super::config::SweepConfig;
use super::manager::LifecycleManager;
use super::sweep::SweepReport;

/// Snapshot of the scheduler for the status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_secs: u64,
    pub runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_report: Option<SweepReport>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct History {
    runs: u64,
    last_run_at: Option<DateTime<Utc>>,
    last_report: Option<SweepReport>,
    last_error: Option<String>,
}

impl History {
    fn record(&mut self, result: &Result<SweepReport, EnrichmentError>) {
        self.runs += 1;
        self.last_run_at = Some(Utc::now());
        match result {
            Ok(report) => {
                self.last_report = Some(report.clone());
                self.last_error = None;
            }
            Err(e) => self.last_error = Some(e.to_string()),
        }
    }
}

/// Runs [`LifecycleManager::sweep`] every `interval_secs`.
///
/// The store is synchronous, so each run goes through `spawn_blocking`.
pub struct SweepScheduler {
    config: SweepConfig,
    manager: Arc<LifecycleManager>,
    running: Arc<AtomicBool>,
    history: Arc<RwLock<History>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SweepScheduler {
    pub fn new(config: SweepConfig, manager: Arc<LifecycleManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            manager,
            running: Arc::new(AtomicBool::new(false)),
            history: Arc::new(RwLock::new(History::default())),
            shutdown_tx,
        }
    }

    /// Spawn the sweep loop. The first sweep runs immediately.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Sweep scheduler already running");
            return;
        }

        let running = Arc::clone(&self.running);
        let manager = Arc::clone(&self.manager);
        let history = Arc::clone(&self.history);
        let backfill_on_start = self.config.backfill_on_start;
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(interval_secs = period.as_secs(), "Starting sweep scheduler");

        tokio::spawn(async move {
            if backfill_on_start {
                if let Err(e) = run_backfill(Arc::clone(&manager)).await {
                    error!("Version pointer backfill failed: {}", e);
                }
            }

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Sweep loop received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        let result = run_sweep(Arc::clone(&manager)).await;
                        if let Err(ref e) = result {
                            error!("Sweep failed: {}", e);
                        }
                        history.write().await.record(&result);
                    }
                }
            }
            info!("Sweep loop stopped");
        });
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping sweep scheduler");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Run a sweep now, outside the interval.
    pub async fn sweep_now(&self) -> Result<SweepReport, EnrichmentError> {
        let result = run_sweep(Arc::clone(&self.manager)).await;
        self.history.write().await.record(&result);
        result
    }

    pub async fn backfill_now(&self) -> Result<BackfillReport, EnrichmentError> {
        run_backfill(Arc::clone(&self.manager)).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        let history = self.history.read().await;
        SchedulerStatus {
            enabled: self.config.enabled,
            running: self.is_running(),
            interval_secs: self.config.interval_secs,
            runs: history.runs,
            last_run_at: history.last_run_at,
            last_report: history.last_report.clone(),
            last_error: history.last_error.clone(),
        }
    }
}

async fn run_sweep(manager: Arc<LifecycleManager>) -> Result<SweepReport, EnrichmentError> {
    tokio::task::spawn_blocking(move || manager.sweep())
        .await
        .map_err(|e| EnrichmentError::Database(format!("sweep task failed: {}", e)))?
}

async fn run_backfill(manager: Arc<LifecycleManager>) -> Result<BackfillReport, EnrichmentError> {
    tokio::task::spawn_blocking(move || manager.backfill_version_pointers())
        .await
        .map_err(|e| EnrichmentError::Database(format!("backfill task failed: {}", e)))?
}
