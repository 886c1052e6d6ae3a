//! Interval scheduler for batch runs
//!
//! Drives full and incremental refreshes at fixed intervals. Time is taken
//! from an injectable [`Clock`] so firing behavior is deterministic under
//! test; production uses [`SystemClock`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::models::BatchKind;
use crate::services::batch::{BatchOrchestrator, BatchRunSummary};

/// Time source abstraction
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by the tokio timer
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// The work a scheduler tick dispatches
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run_batch(&self, kind: BatchKind) -> Result<BatchRunSummary>;
}

#[async_trait]
impl BatchRunner for BatchOrchestrator {
    async fn run_batch(&self, kind: BatchKind) -> Result<BatchRunSummary> {
        self.run(kind, None).await
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub full_interval: Duration,
    pub incremental_interval: Duration,
    /// Run a full batch immediately when the scheduler starts
    pub run_full_on_start: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            full_interval: Duration::from_secs(24 * 3600),
            incremental_interval: Duration::from_secs(6 * 3600),
            run_full_on_start: false,
        }
    }
}

pub struct BatchScheduler {
    runner: Arc<dyn BatchRunner>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    shutdown: Arc<AtomicBool>,
}

impl BatchScheduler {
    pub fn new(
        runner: Arc<dyn BatchRunner>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            runner,
            clock,
            settings,
            shutdown,
        }
    }

    /// Run until the shutdown flag is set. Due times are computed from the
    /// clock after each dispatch, so a long run pushes the next one out
    /// instead of queueing a burst.
    pub async fn run(&self) {
        info!(
            full_interval_secs = self.settings.full_interval.as_secs(),
            incremental_interval_secs = self.settings.incremental_interval.as_secs(),
            "Batch scheduler started"
        );

        if self.settings.run_full_on_start {
            self.dispatch(BatchKind::Full).await;
        }

        let mut next_full = self.clock.now() + chrono_duration(self.settings.full_interval);
        let mut next_incremental =
            self.clock.now() + chrono_duration(self.settings.incremental_interval);

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let now = self.clock.now();
            let due = next_full.min(next_incremental);
            if due > now {
                let wait = (due - now).to_std().unwrap_or(Duration::ZERO);
                self.clock.sleep(wait).await;
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let now = self.clock.now();
            if now >= next_full {
                self.dispatch(BatchKind::Full).await;
                next_full = self.clock.now() + chrono_duration(self.settings.full_interval);
            } else if now >= next_incremental {
                self.dispatch(BatchKind::Incremental).await;
                next_incremental =
                    self.clock.now() + chrono_duration(self.settings.incremental_interval);
            }
        }

        info!("Batch scheduler stopped");
    }

    async fn dispatch(&self, kind: BatchKind) {
        match self.runner.run_batch(kind).await {
            Ok(summary) => info!(
                kind = %kind,
                status = %summary.status,
                processed = summary.processed_users,
                "Scheduled batch run finished"
            ),
            Err(err) => warn!(kind = %kind, error = %err, "Scheduled batch run skipped"),
        }
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(24))
}
