//! Background reclaimer.
//!
//! A single task that wakes every `interval`, asks the ledger for records whose
//! deadline has passed and purges them one at a time. Each purge deletes the
//! blob before the ledger entry, so an interruption leaves an expired entry
//! (already reported as gone) for the next sweep rather than an untracked blob.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::manager::FileManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReclaimerState {
    Idle,
    Scanning,
    Deleting,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub reclaimed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Reclaimer {
    manager: FileManager,
    interval: Duration,
    state: Arc<RwLock<ReclaimerState>>,
}

impl Reclaimer {
    pub fn new(manager: FileManager, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            state: Arc::new(RwLock::new(ReclaimerState::Idle)),
        }
    }

    pub fn state(&self) -> ReclaimerState {
        *self.state.read()
    }

    /// Runs one sweep to completion.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_until(&CancellationToken::new()).await
    }

    /// Spawns the recurring sweep. The first sweep runs immediately.
    pub fn start(self) -> ReclaimerHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();

        info!(interval_secs = self.interval.as_secs(), "Reclaimer started");
        let task = tokio::spawn(async move { self.run(task_token).await });

        ReclaimerHandle { token, task }
    }

    async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Reclaimer received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_until(&token).await;
                }
            }
        }

        info!("Reclaimer stopped");
    }

    async fn sweep_until(&self, token: &CancellationToken) -> SweepReport {
        self.set_state(ReclaimerState::Scanning);

        let expired = match self.manager.expired_records().await {
            Ok(records) => records,
            Err(e) => {
                error!("Reclaimer failed to list expired files: {}", e);
                self.set_state(ReclaimerState::Idle);
                return SweepReport::default();
            }
        };

        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        if !expired.is_empty() {
            self.set_state(ReclaimerState::Deleting);
        }

        for record in expired {
            if token.is_cancelled() {
                debug!("Reclaimer stopping mid-sweep");
                break;
            }

            match self.manager.purge(&record.id).await {
                Ok(()) => {
                    debug!("Reclaimed expired file {} ({})", record.id, record.original_name);
                    report.reclaimed += 1;
                }
                Err(e) => {
                    warn!("Failed to reclaim file {}: {}", record.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                reclaimed = report.reclaimed,
                failed = report.failed,
                "Sweep completed"
            );
        }

        self.set_state(ReclaimerState::Idle);
        report
    }

    fn set_state(&self, state: ReclaimerState) {
        *self.state.write() = state;
    }
}

pub struct ReclaimerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ReclaimerHandle {
    /// Signals the task and waits for the item in progress to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Reclaimer task ended abnormally: {}", e);
        }
    }
}
