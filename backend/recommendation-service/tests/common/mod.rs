//! In-memory data store double with failure injection for integration tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use recommendation_service::db::RecommendationStore;
use recommendation_service::error::{AppError, Result};
use recommendation_service::models::{
    ActionKind, BatchKind, BatchRun, Interaction, ItemMetadata, ItemType, Recommendation,
    RunStatus,
};

type SaveHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct InMemoryStore {
    pub interactions: Vec<Interaction>,
    pub metadata: HashMap<i64, ItemMetadata>,
    pub popular: Vec<i64>,
    pub users: Vec<i64>,
    /// 1-based save call number that fails with a persistence error
    pub fail_save_on_call: Option<usize>,
    pub fail_create_run: bool,
    pub fail_recent_runs: bool,
    /// Invoked after every successful save (used to emulate external signals)
    pub on_save: Option<SaveHook>,

    pub save_calls: AtomicUsize,
    pub next_run_id: AtomicI64,
    pub saved: Mutex<HashMap<i64, Vec<Recommendation>>>,
    pub runs: Mutex<Vec<BatchRun>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            next_run_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn saved_users(&self) -> Vec<i64> {
        let mut users: Vec<i64> = self.saved.lock().unwrap().keys().copied().collect();
        users.sort_unstable();
        users
    }

    pub fn saved_for(&self, user_id: i64) -> Vec<Recommendation> {
        self.saved
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn saved_total(&self) -> usize {
        self.saved.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn save_call_count(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> Vec<BatchRun> {
        self.runs.lock().unwrap().clone()
    }
}

pub fn interaction(user_id: i64, item_id: i64, action: ActionKind) -> Interaction {
    Interaction {
        user_id,
        item_id,
        weight: action.weight(),
        action,
        occurred_at: Utc::now(),
    }
}

#[async_trait]
impl RecommendationStore for InMemoryStore {
    async fn user_item_interactions(&self) -> Result<Vec<Interaction>> {
        Ok(self.interactions.clone())
    }

    async fn item_metadata(&self, item_ids: &[i64]) -> Result<HashMap<i64, ItemMetadata>> {
        Ok(item_ids
            .iter()
            .filter_map(|id| self.metadata.get(id).map(|m| (*id, m.clone())))
            .collect())
    }

    async fn popular_items(&self, _item_type: ItemType, limit: usize) -> Result<Vec<i64>> {
        Ok(self.popular.iter().copied().take(limit).collect())
    }

    async fn users_for_batch(&self, _kind: BatchKind) -> Result<Vec<i64>> {
        Ok(self.users.clone())
    }

    async fn save_recommendations(
        &self,
        recommendations: &[Recommendation],
        _run_id: Option<i64>,
    ) -> Result<()> {
        let call = self.save_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_save_on_call == Some(call) {
            return Err(AppError::Persistence(format!(
                "injected failure on save call {}",
                call
            )));
        }

        let mut saved = self.saved.lock().unwrap();
        let mut affected: Vec<i64> = recommendations.iter().map(|r| r.user_id).collect();
        affected.sort_unstable();
        affected.dedup();
        for user_id in affected {
            saved.remove(&user_id);
        }
        for rec in recommendations {
            saved.entry(rec.user_id).or_default().push(rec.clone());
        }
        drop(saved);

        if let Some(hook) = &self.on_save {
            hook();
        }
        Ok(())
    }

    async fn create_run_log(&self, kind: BatchKind, total_users: u64) -> Result<i64> {
        if self.fail_create_run {
            return Err(AppError::DataStore("injected create failure".to_string()));
        }
        let id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        self.runs.lock().unwrap().push(BatchRun {
            id,
            kind,
            total_users,
            processed_users: 0,
            total_recommendations: 0,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        });
        Ok(id)
    }

    async fn update_run_log<'a>(
        &self,
        run_id: i64,
        processed_users: u64,
        total_recommendations: u64,
        status: RunStatus,
        error: Option<&'a str>,
    ) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| AppError::NotFound(format!("run {}", run_id)))?;
        run.processed_users = processed_users;
        run.total_recommendations = total_recommendations;
        run.status = status;
        run.error = error.map(str::to_string);
        if status.is_terminal() {
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<BatchRun>> {
        if self.fail_recent_runs {
            return Err(AppError::DataStore("injected query failure".to_string()));
        }
        let runs = self.runs.lock().unwrap();
        Ok(runs.iter().rev().take(limit).cloned().collect())
    }
}
