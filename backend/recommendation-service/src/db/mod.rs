//! Data store access for the recommendation pipeline
//!
//! All collaborator queries go through the [`RecommendationStore`] trait so
//! the scoring chain and the batch orchestrator can be exercised against
//! test doubles.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::{
    ActionKind, BatchKind, BatchRun, Interaction, ItemMetadata, ItemType, Recommendation,
    RunStatus,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// All user-item interactions inside the configured trailing window
    async fn user_item_interactions(&self) -> Result<Vec<Interaction>>;

    /// Metadata for the given items; absent ids are simply missing from the map
    async fn item_metadata(&self, item_ids: &[i64]) -> Result<HashMap<i64, ItemMetadata>>;

    /// Ranked popularity list for an item type, most popular first
    async fn popular_items(&self, item_type: ItemType, limit: usize) -> Result<Vec<i64>>;

    /// Target user id sequence for a batch run, ascending
    async fn users_for_batch(&self, kind: BatchKind) -> Result<Vec<i64>>;

    /// Atomically replace the stored recommendations for every user present
    /// in `recommendations` (delete-then-insert in one transaction)
    async fn save_recommendations(
        &self,
        recommendations: &[Recommendation],
        run_id: Option<i64>,
    ) -> Result<()>;

    /// Create a batch run record in `running` state and return its id
    async fn create_run_log(&self, kind: BatchKind, total_users: u64) -> Result<i64>;

    /// Update counters/status of a batch run record
    async fn update_run_log<'a>(
        &self,
        run_id: i64,
        processed_users: u64,
        total_recommendations: u64,
        status: RunStatus,
        error: Option<&'a str>,
    ) -> Result<()>;

    /// Most recent batch runs, newest first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<BatchRun>>;
}

/// PostgreSQL-backed store
pub struct PgStore {
    pool: PgPool,
    interaction_window_days: i64,
    max_interactions: i64,
    popularity_window_days: i64,
    incremental_window_hours: i64,
}

impl PgStore {
    pub fn new(
        pool: PgPool,
        interaction_window_days: i64,
        max_interactions: i64,
        incremental_window_hours: i64,
    ) -> Self {
        Self {
            pool,
            interaction_window_days,
            max_interactions,
            popularity_window_days: 90,
            incremental_window_hours,
        }
    }
}

#[async_trait]
impl RecommendationStore for PgStore {
    async fn user_item_interactions(&self) -> Result<Vec<Interaction>> {
        let cutoff = Utc::now() - Duration::days(self.interaction_window_days);

        let rows = sqlx::query(
            "SELECT user_id, target_id, action_type, action_time
             FROM user_actions
             WHERE target_type IN ('record', 'place', 'plan')
               AND action_time >= $1
             ORDER BY action_time DESC
             LIMIT $2",
        )
        .bind(cutoff)
        .bind(self.max_interactions)
        .fetch_all(&self.pool)
        .await?;

        let mut interactions = Vec::with_capacity(rows.len());
        for row in rows {
            let action_raw: String = row.try_get("action_type")?;
            let Some(action) = ActionKind::parse(&action_raw) else {
                warn!(action = %action_raw, "Skipping interaction with unknown action type");
                continue;
            };
            interactions.push(Interaction {
                user_id: row.try_get("user_id")?,
                item_id: row.try_get("target_id")?,
                weight: action.weight(),
                action,
                occurred_at: row.try_get("action_time")?,
            });
        }

        debug!(count = interactions.len(), "Loaded user-item interactions");
        Ok(interactions)
    }

    async fn item_metadata(&self, item_ids: &[i64]) -> Result<HashMap<i64, ItemMetadata>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            "SELECT i.id, i.title, i.description, i.category, i.region,
                    COALESCE(m.like_count, 0) AS like_count,
                    COALESCE(m.comment_count, 0) AS comment_count
             FROM items i
             LEFT JOIN item_metadata m ON m.item_id = i.id
             WHERE i.id = ANY($1) AND i.is_public",
        )
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut metadata = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            metadata.insert(
                id,
                ItemMetadata {
                    title: row.try_get("title")?,
                    description: row.try_get("description")?,
                    category: row.try_get("category")?,
                    region: row.try_get("region")?,
                    like_count: row.try_get("like_count")?,
                    comment_count: row.try_get("comment_count")?,
                },
            );
        }

        Ok(metadata)
    }

    async fn popular_items(&self, item_type: ItemType, limit: usize) -> Result<Vec<i64>> {
        let cutoff = Utc::now() - Duration::days(self.popularity_window_days);

        let rows = sqlx::query(
            "SELECT target_id
             FROM user_actions
             WHERE target_type = $1
               AND action_time >= $2
             GROUP BY target_id
             ORDER BY COUNT(*) DESC, MAX(action_time) DESC
             LIMIT $3",
        )
        .bind(item_type.as_str())
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(row.try_get("target_id")?);
        }
        Ok(items)
    }

    async fn users_for_batch(&self, kind: BatchKind) -> Result<Vec<i64>> {
        let rows = match kind {
            BatchKind::Incremental => {
                let cutoff = Utc::now() - Duration::hours(self.incremental_window_hours);
                sqlx::query(
                    "SELECT DISTINCT user_id
                     FROM user_actions
                     WHERE action_time >= $1
                     ORDER BY user_id",
                )
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?
            }
            // Mini runs take a prefix of the full population; the
            // orchestrator applies the ceiling.
            BatchKind::Full | BatchKind::Mini => {
                sqlx::query(
                    "SELECT DISTINCT user_id
                     FROM user_actions
                     ORDER BY user_id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(row.try_get("user_id")?);
        }
        Ok(users)
    }

    async fn save_recommendations(
        &self,
        recommendations: &[Recommendation],
        run_id: Option<i64>,
    ) -> Result<()> {
        if recommendations.is_empty() {
            return Ok(());
        }

        let mut affected_users: Vec<i64> = recommendations.iter().map(|r| r.user_id).collect();
        affected_users.sort_unstable();
        affected_users.dedup();

        let mut user_ids = Vec::with_capacity(recommendations.len());
        let mut item_ids = Vec::with_capacity(recommendations.len());
        let mut item_types = Vec::with_capacity(recommendations.len());
        let mut scores = Vec::with_capacity(recommendations.len());
        for rec in recommendations {
            user_ids.push(rec.user_id);
            item_ids.push(rec.item_id);
            item_types.push(rec.item_type.as_str().to_string());
            scores.push(rec.score);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        sqlx::query("DELETE FROM recommendations WHERE user_id = ANY($1)")
            .bind(&affected_users)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        sqlx::query(
            "INSERT INTO recommendations (user_id, item_id, item_type, score, batch_run_id, created_at)
             SELECT u, i, t, s, $5, NOW()
             FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::float8[]) AS x(u, i, t, s)",
        )
        .bind(&user_ids)
        .bind(&item_ids)
        .bind(&item_types)
        .bind(&scores)
        .bind(run_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        debug!(
            rows = recommendations.len(),
            users = affected_users.len(),
            "Recommendation chunk persisted"
        );
        Ok(())
    }

    async fn create_run_log(&self, kind: BatchKind, total_users: u64) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO recommendation_batch_runs
                 (batch_kind, total_users, processed_users, total_recommendations, status, started_at)
             VALUES ($1, $2, 0, 0, 'running', NOW())
             RETURNING id",
        )
        .bind(kind.as_str())
        .bind(total_users as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn update_run_log<'a>(
        &self,
        run_id: i64,
        processed_users: u64,
        total_recommendations: u64,
        status: RunStatus,
        error: Option<&'a str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE recommendation_batch_runs
             SET processed_users = $2,
                 total_recommendations = $3,
                 status = $4,
                 error_message = $5,
                 finished_at = CASE WHEN $4 <> 'running' THEN NOW() ELSE finished_at END
             WHERE id = $1",
        )
        .bind(run_id)
        .bind(processed_users as i64)
        .bind(total_recommendations as i64)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<BatchRun>> {
        let rows = sqlx::query(
            "SELECT id, batch_kind, total_users, processed_users, total_recommendations,
                    status, started_at, finished_at, error_message
             FROM recommendation_batch_runs
             ORDER BY started_at DESC
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_raw: String = row.try_get("batch_kind")?;
            let status_raw: String = row.try_get("status")?;
            let (Some(kind), Some(status)) =
                (BatchKind::parse(&kind_raw), RunStatus::parse(&status_raw))
            else {
                warn!(kind = %kind_raw, status = %status_raw, "Skipping malformed batch run row");
                continue;
            };
            let total_users: i64 = row.try_get("total_users")?;
            let processed_users: i64 = row.try_get("processed_users")?;
            let total_recommendations: i64 = row.try_get("total_recommendations")?;
            runs.push(BatchRun {
                id: row.try_get("id")?,
                kind,
                total_users: total_users.max(0) as u64,
                processed_users: processed_users.max(0) as u64,
                total_recommendations: total_recommendations.max(0) as u64,
                status,
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
                error: row.try_get("error_message")?,
            });
        }
        Ok(runs)
    }
}
