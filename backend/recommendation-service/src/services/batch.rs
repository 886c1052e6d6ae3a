// ============================================
// Batch Orchestrator
// ============================================
//
// Refreshes stored recommendations for a target user population in fixed
// size chunks. Each chunk is persisted atomically (delete-then-insert for
// the chunk's users), after which the in-memory buffer is dropped and the
// process RSS is checked against the configured ceiling. A failing chunk
// save marks the run `failed`; a ceiling breach marks it `stopped`; chunks
// persisted earlier stay valid either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::RecommendationStore;
use crate::error::{AppError, Result};
use crate::models::{BatchKind, ItemType, Recommendation, RunStatus};
use crate::services::memory::MemoryMonitor;
use crate::services::recommender::{RecommendRequest, Recommender};
use crate::services::run_log::{FileRunLog, RunRecord};

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Users persisted per atomic chunk in full/incremental runs
    pub chunk_size: usize,
    /// Smaller chunk for mini runs
    pub mini_chunk_size: usize,
    /// Default user ceiling for mini runs
    pub mini_user_limit: usize,
    /// Recommendations generated per user
    pub per_user_limit: usize,
    /// Item type refreshed by batch runs
    pub item_type: ItemType,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            mini_chunk_size: 25,
            mini_user_limit: 100,
            per_user_limit: 10,
            item_type: ItemType::Record,
        }
    }
}

/// Outcome of one batch run, also mirrored into the run logs
#[derive(Debug, Clone, Serialize)]
pub struct BatchRunSummary {
    pub run_id: Option<i64>,
    pub kind: BatchKind,
    pub status: RunStatus,
    pub total_users: u64,
    pub processed_users: u64,
    pub total_recommendations: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

pub struct BatchOrchestrator {
    store: Arc<dyn RecommendationStore>,
    recommender: Arc<Recommender>,
    run_log: FileRunLog,
    memory: MemoryMonitor,
    settings: BatchSettings,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        recommender: Arc<Recommender>,
        run_log: FileRunLog,
        memory: MemoryMonitor,
        settings: BatchSettings,
    ) -> Self {
        Self {
            store,
            recommender,
            run_log,
            memory,
            settings,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Request cooperative cancellation; honored at the next chunk boundary,
    /// after the in-flight chunk has been persisted.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Most recent records from the redundant file log, newest first
    pub fn file_records(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.run_log.read_recent(limit)
    }

    /// Execute one batch run. Only one run may be in flight at a time;
    /// overlapping calls are rejected. The run itself never errors: its
    /// outcome is the returned summary, mirrored to both run logs.
    pub async fn run(
        &self,
        kind: BatchKind,
        user_limit: Option<usize>,
    ) -> Result<BatchRunSummary> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable(
                "a batch run is already in progress".to_string(),
            ));
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let summary = self.execute(kind, user_limit).await;

        self.running.store(false, Ordering::SeqCst);
        Ok(summary)
    }

    async fn execute(&self, kind: BatchKind, user_limit: Option<usize>) -> BatchRunSummary {
        let started_at = Utc::now();
        info!(kind = %kind, "Starting batch run");

        let mut users = match self.store.users_for_batch(kind).await {
            Ok(users) => users,
            Err(err) => {
                error!(kind = %kind, error = %err, "Failed to resolve batch target users");
                let summary = BatchRunSummary {
                    run_id: None,
                    kind,
                    status: RunStatus::Failed,
                    total_users: 0,
                    processed_users: 0,
                    total_recommendations: 0,
                    started_at,
                    finished_at: Utc::now(),
                    error: Some(format!("failed to resolve target users: {}", err)),
                };
                self.append_file_record(&summary);
                return summary;
            }
        };

        if kind == BatchKind::Mini {
            let ceiling = user_limit.unwrap_or(self.settings.mini_user_limit);
            users.truncate(ceiling);
        }
        let total_users = users.len() as u64;

        // A rejected create must not block the pipeline; fall back to an
        // in-memory sentinel id and keep the file log as the record.
        let run_id = match self.store.create_run_log(kind, total_users).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(error = %err, "Run log create rejected, continuing with in-memory run id");
                None
            }
        };

        let chunk_size = match kind {
            BatchKind::Mini => self.settings.mini_chunk_size,
            _ => self.settings.chunk_size,
        }
        .max(1);

        let mut processed_users: u64 = 0;
        let mut total_recommendations: u64 = 0;
        let mut status = RunStatus::Completed;
        let mut run_error: Option<String> = None;

        for chunk in users.chunks(chunk_size) {
            if self.stop_requested.load(Ordering::SeqCst) {
                status = RunStatus::Stopped;
                run_error = Some("stop requested".to_string());
                break;
            }

            let (chunk_recs, chunk_processed) = self.build_chunk(chunk).await;

            if let Err(err) = self.store.save_recommendations(&chunk_recs, run_id).await {
                error!(error = %err, "Chunk persistence failed, stopping run");
                status = RunStatus::Failed;
                run_error = Some(format!("chunk persistence failed: {}", err));
                break;
            }

            processed_users += chunk_processed;
            total_recommendations += chunk_recs.len() as u64;
            drop(chunk_recs);

            if let Some(id) = run_id {
                if let Err(err) = self
                    .store
                    .update_run_log(
                        id,
                        processed_users,
                        total_recommendations,
                        RunStatus::Running,
                        None,
                    )
                    .await
                {
                    warn!(run_id = id, error = %err, "Run log progress update failed");
                }
            }

            if self.memory.exceeds_ceiling() {
                let rss = self.memory.rss_bytes();
                warn!(
                    rss_bytes = rss,
                    ceiling_bytes = self.memory.ceiling_bytes(),
                    "Memory ceiling exceeded, stopping run"
                );
                status = RunStatus::Stopped;
                run_error = Some(format!(
                    "memory ceiling exceeded: rss {} bytes over {} bytes",
                    rss,
                    self.memory.ceiling_bytes()
                ));
                break;
            }
        }

        if let Some(id) = run_id {
            if let Err(err) = self
                .store
                .update_run_log(
                    id,
                    processed_users,
                    total_recommendations,
                    status,
                    run_error.as_deref(),
                )
                .await
            {
                warn!(run_id = id, error = %err, "Final run log update failed");
            }
        }

        let summary = BatchRunSummary {
            run_id,
            kind,
            status,
            total_users,
            processed_users,
            total_recommendations,
            started_at,
            finished_at: Utc::now(),
            error: run_error,
        };
        self.append_file_record(&summary);

        info!(
            kind = %kind,
            status = %summary.status,
            processed = summary.processed_users,
            recommendations = summary.total_recommendations,
            "Batch run finished"
        );
        summary
    }

    /// Generate recommendations for one chunk of users. A single user's
    /// failure is logged and skipped; it never aborts the chunk.
    async fn build_chunk(&self, chunk: &[i64]) -> (Vec<Recommendation>, u64) {
        let mut recommendations = Vec::new();
        let mut processed: u64 = 0;

        for &user_id in chunk {
            let request = RecommendRequest {
                user_id,
                item_type: self.settings.item_type,
                limit: self.settings.per_user_limit,
                exclude_items: Vec::new(),
                filter: None,
            };
            match self.recommender.generate(&request).await {
                Ok(items) => {
                    let generated_at = Utc::now();
                    recommendations.extend(items.into_iter().map(|item| Recommendation {
                        user_id,
                        item_id: item.item_id,
                        item_type: item.item_type,
                        score: item.score,
                        generated_at,
                    }));
                    processed += 1;
                }
                Err(err) => {
                    warn!(user_id, error = %err, "Skipping user after recommendation failure");
                }
            }
        }

        (recommendations, processed)
    }

    fn append_file_record(&self, summary: &BatchRunSummary) {
        let record = RunRecord {
            timestamp: summary.finished_at,
            kind: summary.kind,
            status: summary.status,
            processed_users: summary.processed_users,
            total_recommendations: summary.total_recommendations,
            error: summary.error.clone(),
        };
        if let Err(err) = self.run_log.append(&record) {
            error!(
                path = %self.run_log.path().display(),
                error = %err,
                "Failed to append run record to file log"
            );
        }
    }
}
