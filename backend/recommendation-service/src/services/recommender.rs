// ============================================
// Tiered Recommendation Chain
// ============================================
//
// Strategy selection for a single request:
//   1. Collaborative scoring        (user known to the loaded factor model)
//   2. Realtime user-based scoring  (active user unknown to the model)
//   3. Store-ranked popularity      (trailing engagement window)
//   4. Matrix-derived popularity    (tops up tier 3 when a model is loaded)
//   5. Deterministic last resort    (no data source available at all)
//
// Tiers 1 and 2 are mutually exclusive branch points; only 3 and 4 compose.
// Data and model failures degrade to the next tier and are never surfaced
// to the caller.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::RecommendationStore;
use crate::error::{AppError, Result};
use crate::models::{ItemType, ScoreDiagnostics, ScoredItem, SourceTier};
use crate::services::filter::{apply_filter, FilterSpec};
use crate::services::model::{FactorModelStore, ModelState};
use crate::services::scoring;

/// Weighting of the realtime user-based combined score
const REALTIME_MEAN_WEIGHT: f64 = 0.4;
const REALTIME_VOLUME_WEIGHT: f64 = 0.6;

#[derive(Debug, Clone)]
pub struct RecommendRequest {
    pub user_id: i64,
    pub item_type: ItemType,
    pub limit: usize,
    pub exclude_items: Vec<i64>,
    pub filter: Option<FilterSpec>,
}

pub struct Recommender {
    store: Arc<dyn RecommendationStore>,
    models: Arc<FactorModelStore>,
}

impl Recommender {
    pub fn new(store: Arc<dyn RecommendationStore>, models: Arc<FactorModelStore>) -> Self {
        Self { store, models }
    }

    /// Full request path: run the chain, enrich with item metadata, apply
    /// the post-filter. Only precondition violations surface as errors.
    pub async fn recommend(&self, request: &RecommendRequest) -> Result<Vec<ScoredItem>> {
        let mut items = self.generate(request).await?;

        self.attach_metadata(&mut items).await;
        if let Some(filter) = &request.filter {
            items = apply_filter(items, filter);
        }
        Ok(items)
    }

    /// Run the tier chain without metadata enrichment or filtering.
    /// Used by the batch pipeline where only ids and scores are persisted.
    pub async fn generate(&self, request: &RecommendRequest) -> Result<Vec<ScoredItem>> {
        if request.limit == 0 {
            return Err(AppError::Validation("limit must be positive".to_string()));
        }

        let exclude: HashSet<i64> = request.exclude_items.iter().copied().collect();
        Ok(self.run_chain(request, &exclude).await)
    }

    async fn run_chain(&self, request: &RecommendRequest, exclude: &HashSet<i64>) -> Vec<ScoredItem> {
        if let Some(model) = self.models.snapshot() {
            if model.user_index.contains(request.user_id) {
                match scoring::recommend_collaborative(
                    &model,
                    request.user_id,
                    request.item_type,
                    request.limit,
                    exclude,
                ) {
                    Ok(items) if !items.is_empty() => return items,
                    Ok(_) => debug!(
                        user_id = request.user_id,
                        "Collaborative tier empty, falling through"
                    ),
                    Err(err) => warn!(
                        user_id = request.user_id,
                        error = %err,
                        "Collaborative tier failed, falling through"
                    ),
                }
            } else {
                let items = self.recommend_realtime(request, exclude).await;
                if !items.is_empty() {
                    return items;
                }
            }
        }

        self.recommend_popular(request, exclude).await
    }

    /// Tier 2: score candidate items from live interaction history for a
    /// user the model does not know yet.
    async fn recommend_realtime(
        &self,
        request: &RecommendRequest,
        exclude: &HashSet<i64>,
    ) -> Vec<ScoredItem> {
        let interactions = match self.store.user_item_interactions().await {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "Interaction query failed, falling through");
                return Vec::new();
            }
        };

        let touched: HashSet<i64> = interactions
            .iter()
            .filter(|i| i.user_id == request.user_id)
            .map(|i| i.item_id)
            .collect();
        if touched.is_empty() {
            debug!(
                user_id = request.user_id,
                "No interaction history, falling through"
            );
            return Vec::new();
        }

        struct ItemStats {
            weight_sum: f64,
            count: u64,
        }
        let mut stats: HashMap<i64, ItemStats> = HashMap::new();
        for interaction in &interactions {
            let entry = stats.entry(interaction.item_id).or_insert(ItemStats {
                weight_sum: 0.0,
                count: 0,
            });
            entry.weight_sum += interaction.weight;
            entry.count += 1;
        }

        let candidates: Vec<(i64, &ItemStats)> = stats
            .iter()
            .filter(|(id, _)| !touched.contains(id) && !exclude.contains(id))
            .map(|(&id, s)| (id, s))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let max_count = candidates
            .iter()
            .map(|(_, s)| s.count)
            .max()
            .unwrap_or(1)
            .max(1) as f64;

        let mut scored: Vec<ScoredItem> = candidates
            .into_iter()
            .map(|(item_id, s)| {
                let mean = s.weight_sum / s.count as f64;
                let combined = REALTIME_MEAN_WEIGHT * mean
                    + REALTIME_VOLUME_WEIGHT * (s.count as f64 / max_count);
                ScoredItem {
                    item_id,
                    score: combined.clamp(0.1, 1.0),
                    item_type: request.item_type,
                    tier: SourceTier::RealtimeUser,
                    diagnostics: ScoreDiagnostics {
                        raw_score: combined,
                        interaction_count: Some(s.count),
                        ..Default::default()
                    },
                    metadata: None,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.item_id.cmp(&b.item_id))
        });
        scored.truncate(request.limit);
        scored
    }

    /// Tiers 3-5: store-ranked popularity, matrix-derived top-up, and the
    /// deterministic sequence of last resort.
    async fn recommend_popular(
        &self,
        request: &RecommendRequest,
        exclude: &HashSet<i64>,
    ) -> Vec<ScoredItem> {
        let limit = request.limit;
        let mut items: Vec<ScoredItem> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();

        match self
            .store
            .popular_items(request.item_type, limit * 2)
            .await
        {
            Ok(ranked) => {
                for (rank, &item_id) in ranked.iter().enumerate() {
                    if items.len() >= limit {
                        break;
                    }
                    if exclude.contains(&item_id) || !seen.insert(item_id) {
                        continue;
                    }
                    let score = (1.0 - rank as f64 * 0.1).max(0.1);
                    items.push(ScoredItem {
                        item_id,
                        score,
                        item_type: request.item_type,
                        tier: SourceTier::PopularityRanked,
                        diagnostics: ScoreDiagnostics {
                            raw_score: score,
                            rank: Some(rank),
                            ..Default::default()
                        },
                        metadata: None,
                    });
                }
            }
            Err(err) => {
                warn!(error = %err, "Popularity query failed, falling through");
            }
        }

        if items.len() < limit {
            if let Some(model) = self.models.snapshot() {
                top_up_from_matrix(&model, request.item_type, limit, exclude, &mut seen, &mut items);
            }
        }

        if items.is_empty() {
            last_resort(request.item_type, limit, exclude, &mut items);
        }

        items
    }

    async fn attach_metadata(&self, items: &mut [ScoredItem]) {
        if items.is_empty() {
            return;
        }
        let ids: Vec<i64> = items.iter().map(|i| i.item_id).collect();
        match self.store.item_metadata(&ids).await {
            Ok(mut metadata) => {
                for item in items.iter_mut() {
                    item.metadata = metadata.remove(&item.item_id);
                }
            }
            Err(err) => {
                warn!(error = %err, "Metadata fetch failed, serving results without metadata");
            }
        }
    }
}

/// Tier 4: rank items by their summed interaction weight in the model's
/// sparse matrix, normalized by the largest sum.
fn top_up_from_matrix(
    model: &ModelState,
    item_type: ItemType,
    limit: usize,
    exclude: &HashSet<i64>,
    seen: &mut HashSet<i64>,
    items: &mut Vec<ScoredItem>,
) {
    let sums = model.interactions.column_sums();
    let max_sum = sums.iter().cloned().fold(0.0_f64, f64::max);
    if max_sum <= 0.0 {
        return;
    }

    let mut order: Vec<usize> = (0..sums.len()).filter(|&i| sums[i] > 0.0).collect();
    order.sort_by(|&a, &b| {
        sums[b]
            .partial_cmp(&sums[a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });

    for idx in order {
        if items.len() >= limit {
            break;
        }
        let Some(item_id) = model.item_index.id_at(idx) else {
            continue;
        };
        if exclude.contains(&item_id) || !seen.insert(item_id) {
            continue;
        }
        items.push(ScoredItem {
            item_id,
            score: sums[idx] / max_sum,
            item_type,
            tier: SourceTier::PopularityMatrix,
            diagnostics: ScoreDiagnostics {
                raw_score: sums[idx],
                ..Default::default()
            },
            metadata: None,
        });
    }
}

/// Tier 5: a fixed, repeatable ascending id sequence so the API never comes
/// back empty-handed for lack of data.
fn last_resort(
    item_type: ItemType,
    limit: usize,
    exclude: &HashSet<i64>,
    items: &mut Vec<ScoredItem>,
) {
    let mut item_id: i64 = 1;
    while items.len() < limit {
        if !exclude.contains(&item_id) {
            let rank = items.len();
            let score = (1.0 - rank as f64 * 0.1).max(0.1);
            items.push(ScoredItem {
                item_id,
                score,
                item_type,
                tier: SourceTier::LastResort,
                diagnostics: ScoreDiagnostics {
                    raw_score: score,
                    rank: Some(rank),
                    ..Default::default()
                },
                metadata: None,
            });
        }
        item_id += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockRecommendationStore;
    use crate::models::{ActionKind, Interaction};
    use crate::services::model::{
        build_interaction_matrix, rebuild_index_maps, FactorModelStore, ModelState,
    };
    use chrono::Utc;
    use ndarray::Array2;

    fn interaction(user_id: i64, item_id: i64, action: ActionKind) -> Interaction {
        Interaction {
            user_id,
            item_id,
            weight: action.weight(),
            action,
            occurred_at: Utc::now(),
        }
    }

    fn request(user_id: i64, limit: usize, exclude: Vec<i64>) -> RecommendRequest {
        RecommendRequest {
            user_id,
            item_type: ItemType::Record,
            limit,
            exclude_items: exclude,
            filter: None,
        }
    }

    /// Model built from an interaction history; factor values are not
    /// exercised by these tests (tier 1 has its own suite).
    fn model_from_history(history: &[Interaction], latent_dim: usize) -> ModelState {
        let (user_index, item_index) = rebuild_index_maps(history);
        let interactions = build_interaction_matrix(history, &user_index, &item_index);
        ModelState {
            user_factors: Array2::zeros((user_index.len(), latent_dim)),
            item_factors: Array2::zeros((item_index.len(), latent_dim)),
            user_index,
            item_index,
            interactions,
            loaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn realtime_tier_never_recommends_own_history() {
        // User 99 is active but unknown to the model (model only knows user 1)
        let history = vec![
            interaction(1, 10, ActionKind::Like),
            interaction(1, 20, ActionKind::View),
        ];
        let models = Arc::new(FactorModelStore::with_state(model_from_history(&history, 2)));

        let mut store = MockRecommendationStore::new();
        store.expect_user_item_interactions().returning(|| {
            Ok(vec![
                interaction(99, 10, ActionKind::Like),
                interaction(99, 20, ActionKind::View),
                interaction(1, 20, ActionKind::Like),
                interaction(1, 30, ActionKind::Like),
                interaction(2, 30, ActionKind::Like),
                interaction(2, 40, ActionKind::View),
            ])
        });

        let recommender = Recommender::new(Arc::new(store), models);
        let items = recommender.generate(&request(99, 5, vec![])).await.unwrap();

        assert!(!items.is_empty());
        assert!(items.iter().all(|i| i.tier == SourceTier::RealtimeUser));
        assert!(items.iter().all(|i| i.item_id != 10 && i.item_id != 20));
        assert!(items.iter().all(|i| (0.1..=1.0).contains(&i.score)));
    }

    #[tokio::test]
    async fn realtime_tier_combined_score_formula() {
        let history = vec![interaction(1, 10, ActionKind::Like)];
        let models = Arc::new(FactorModelStore::with_state(model_from_history(&history, 2)));

        let mut store = MockRecommendationStore::new();
        store.expect_user_item_interactions().returning(|| {
            Ok(vec![
                // user 99's own history makes the tier applicable
                interaction(99, 1, ActionKind::View),
                // item 30: two likes -> mean 4.0, count 2 (max)
                interaction(1, 30, ActionKind::Like),
                interaction(2, 30, ActionKind::Like),
                // item 40: one view -> mean 1.0, count 1
                interaction(2, 40, ActionKind::View),
            ])
        });

        let recommender = Recommender::new(Arc::new(store), models);
        let items = recommender.generate(&request(99, 5, vec![])).await.unwrap();

        assert_eq!(items.len(), 2);
        // item 30: 0.4*4.0 + 0.6*(2/2) = 2.2 -> clipped to 1.0
        assert_eq!(items[0].item_id, 30);
        assert_eq!(items[0].score, 1.0);
        assert!((items[0].diagnostics.raw_score - 2.2).abs() < 1e-9);
        // item 40: 0.4*1.0 + 0.6*(1/2) = 0.7
        assert_eq!(items[1].item_id, 40);
        assert!((items[1].score - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn popularity_rank_scores_keep_original_rank_after_exclusion() {
        let models = Arc::new(FactorModelStore::new());

        let mut store = MockRecommendationStore::new();
        store
            .expect_popular_items()
            .returning(|_, _| Ok(vec![10, 11, 12, 13, 14, 15]));
        store
            .expect_item_metadata()
            .returning(|_| Ok(HashMap::new()));

        let recommender = Recommender::new(Arc::new(store), models);
        let items = recommender
            .recommend(&request(1, 3, vec![11]))
            .await
            .unwrap();

        let ids: Vec<i64> = items.iter().map(|i| i.item_id).collect();
        let scores: Vec<f64> = items.iter().map(|i| i.score).collect();
        assert_eq!(ids, vec![10, 12, 13]);
        assert_eq!(scores, vec![1.0, 0.8, 0.7]);
        assert!(items.iter().all(|i| i.tier == SourceTier::PopularityRanked));
    }

    #[tokio::test]
    async fn matrix_tier_tops_up_short_popularity_without_duplicates() {
        // Matrix popularity: item 20 (9.0) > item 10 (5.0) > item 30 (1.0)
        let history = vec![
            interaction(1, 10, ActionKind::Post),
            interaction(1, 20, ActionKind::Post),
            interaction(2, 20, ActionKind::Like),
            interaction(2, 30, ActionKind::View),
        ];
        let models = Arc::new(FactorModelStore::with_state(model_from_history(&history, 2)));

        let mut store = MockRecommendationStore::new();
        store
            .expect_popular_items()
            .returning(|_, _| Ok(vec![20, 99]));
        // User 777 is unknown to the model and has no history: the realtime
        // tier declines and the popularity tiers run
        store
            .expect_user_item_interactions()
            .returning(|| Ok(vec![]));

        let recommender = Recommender::new(Arc::new(store), models);
        let items = recommender.generate(&request(777, 4, vec![])).await.unwrap();

        let ids: Vec<i64> = items.iter().map(|i| i.item_id).collect();
        // Tier 3 contributes 20 (rank 0) and 99 (rank 1); tier 4 tops up
        // with 10 and 30, skipping the already-present 20
        assert_eq!(ids, vec![20, 99, 10, 30]);
        assert_eq!(items[0].tier, SourceTier::PopularityRanked);
        assert_eq!(items[2].tier, SourceTier::PopularityMatrix);
        // Matrix scores normalize by the max column sum
        assert!((items[2].score - 5.0 / 9.0).abs() < 1e-9);
        assert!((items[3].score - 1.0 / 9.0).abs() < 1e-9);

        let distinct: HashSet<i64> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), ids.len());
    }

    #[tokio::test]
    async fn last_resort_kicks_in_when_no_data_source_is_available() {
        let models = Arc::new(FactorModelStore::new());

        let mut store = MockRecommendationStore::new();
        store
            .expect_popular_items()
            .returning(|_, _| Err(AppError::DataStore("connection refused".to_string())));

        let recommender = Recommender::new(Arc::new(store), models);
        let items = recommender.generate(&request(1, 3, vec![2])).await.unwrap();

        let ids: Vec<i64> = items.iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert!(items.iter().all(|i| i.tier == SourceTier::LastResort));
        assert_eq!(items[0].score, 1.0);
    }

    #[tokio::test]
    async fn identical_popularity_requests_are_idempotent() {
        let models = Arc::new(FactorModelStore::new());

        let mut store = MockRecommendationStore::new();
        store
            .expect_popular_items()
            .times(2)
            .returning(|_, _| Ok(vec![5, 6, 7, 8]));

        let recommender = Recommender::new(Arc::new(store), models);
        let first = recommender.generate(&request(1, 4, vec![])).await.unwrap();
        let second = recommender.generate(&request(1, 4, vec![])).await.unwrap();

        let ids = |items: &[ScoredItem]| items.iter().map(|i| (i.item_id, i.score)).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let models = Arc::new(FactorModelStore::new());
        let store = MockRecommendationStore::new();
        let recommender = Recommender::new(Arc::new(store), models);

        let err = recommender.generate(&request(1, 0, vec![])).await;
        assert!(matches!(err, Err(AppError::Validation(_))));
    }
}
