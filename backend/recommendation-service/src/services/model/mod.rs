// ============================================
// Factor Model Store
// ============================================
//
// Owns the latent-factor matrices and the id/index bijections used by
// collaborative scoring. The loaded state is replaced wholesale behind an
// Arc swap so in-flight readers keep a consistent snapshot while a rebuild
// installs a new one.

pub mod artifact;
pub mod index_map;
pub mod sparse;

pub use artifact::{ArtifactBundle, ModelArtifact};
pub use index_map::IndexMap;
pub use sparse::CsrMatrix;

use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::RecommendationStore;
use crate::error::{AppError, Result};
use crate::models::Interaction;

/// Immutable, fully-assembled model snapshot
#[derive(Debug)]
pub struct ModelState {
    /// Rows = users, columns = latent factors
    pub user_factors: Array2<f32>,
    /// Rows = items, columns = latent factors
    pub item_factors: Array2<f32>,
    pub user_index: IndexMap,
    pub item_index: IndexMap,
    /// User-row by item-column interaction weights
    pub interactions: CsrMatrix,
    pub loaded_at: DateTime<Utc>,
}

impl ModelState {
    pub fn latent_dim(&self) -> usize {
        self.user_factors.ncols()
    }
}

/// Snapshot of model status for the info endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub loaded: bool,
    pub user_count: usize,
    pub item_count: usize,
    pub latent_dim: usize,
    pub interaction_nnz: usize,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Holder for the current model; empty until a load succeeds.
///
/// An empty store is a structural fallback signal for the recommendation
/// chain, not an error state.
pub struct FactorModelStore {
    state: RwLock<Option<Arc<ModelState>>>,
}

impl Default for FactorModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FactorModelStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    /// Build a store that already holds the given state
    pub fn with_state(state: ModelState) -> Self {
        Self {
            state: RwLock::new(Some(Arc::new(state))),
        }
    }

    /// Load an artifact from disk, reconstructing index maps and the
    /// interaction matrix from the data store when the artifact is bare.
    /// Replaces any previously loaded model wholesale.
    pub async fn load(&self, path: &Path, store: &dyn RecommendationStore) -> Result<()> {
        let artifact = ModelArtifact::load(path)?;
        let state = match artifact.bundle {
            Some(_) => assemble_bundled(artifact)?,
            None => {
                let interactions = store.user_item_interactions().await?;
                assemble_bare(artifact, &interactions)?
            }
        };

        info!(
            users = state.user_index.len(),
            items = state.item_index.len(),
            latent_dim = state.latent_dim(),
            interaction_nnz = state.interactions.nnz(),
            "Factor model loaded"
        );

        self.install(state);
        Ok(())
    }

    /// Install a fresh state, swapping out the previous one atomically
    pub fn install(&self, state: ModelState) {
        let mut guard = self.state.write().expect("model lock poisoned");
        *guard = Some(Arc::new(state));
    }

    /// Current snapshot, if a model is loaded
    pub fn snapshot(&self) -> Option<Arc<ModelState>> {
        self.state.read().expect("model lock poisoned").clone()
    }

    pub fn loaded(&self) -> bool {
        self.state.read().expect("model lock poisoned").is_some()
    }

    pub fn info(&self) -> ModelInfo {
        match self.snapshot() {
            Some(state) => ModelInfo {
                loaded: true,
                user_count: state.user_index.len(),
                item_count: state.item_index.len(),
                latent_dim: state.latent_dim(),
                interaction_nnz: state.interactions.nnz(),
                loaded_at: Some(state.loaded_at),
            },
            None => ModelInfo {
                loaded: false,
                user_count: 0,
                item_count: 0,
                latent_dim: 0,
                interaction_nnz: 0,
                loaded_at: None,
            },
        }
    }
}

/// Rebuild both index maps from interaction history: indices follow the
/// ascending order of the distinct ids observed.
pub fn rebuild_index_maps(interactions: &[Interaction]) -> (IndexMap, IndexMap) {
    let users = IndexMap::from_ids(interactions.iter().map(|i| i.user_id));
    let items = IndexMap::from_ids(interactions.iter().map(|i| i.item_id));
    (users, items)
}

/// Project interaction history onto the index maps as a sparse weight matrix
pub fn build_interaction_matrix(
    interactions: &[Interaction],
    user_index: &IndexMap,
    item_index: &IndexMap,
) -> CsrMatrix {
    let triplets = interactions
        .iter()
        .filter_map(|i| {
            let row = user_index.index_of(i.user_id)?;
            let col = item_index.index_of(i.item_id)?;
            Some((row, col, i.weight))
        })
        .collect();
    CsrMatrix::from_triplets(user_index.len(), item_index.len(), triplets)
}

fn factor_matrix(dim: usize, rows: usize, data: Vec<f32>) -> Result<Array2<f32>> {
    Array2::from_shape_vec((rows, dim), data)
        .map_err(|e| AppError::Artifact(format!("factor matrix shape: {}", e)))
}

fn assemble_bundled(artifact: ModelArtifact) -> Result<ModelState> {
    let bundle = artifact.bundle.expect("bundled artifact");
    let user_factors = factor_matrix(
        artifact.latent_dim,
        bundle.user_ids.len(),
        artifact.user_factors,
    )?;
    let item_factors = factor_matrix(
        artifact.latent_dim,
        bundle.item_ids.len(),
        artifact.item_factors,
    )?;

    Ok(ModelState {
        user_factors,
        item_factors,
        user_index: IndexMap::from_ids(bundle.user_ids),
        item_index: IndexMap::from_ids(bundle.item_ids),
        interactions: bundle.interactions,
        loaded_at: Utc::now(),
    })
}

fn assemble_bare(artifact: ModelArtifact, interactions: &[Interaction]) -> Result<ModelState> {
    if interactions.is_empty() {
        warn!("No interaction history available to rebuild index maps");
        return Err(AppError::Artifact(
            "bare artifact with empty interaction history".to_string(),
        ));
    }

    let (user_index, item_index) = rebuild_index_maps(interactions);
    if user_index.len() != artifact.user_count() || item_index.len() != artifact.item_count() {
        return Err(AppError::Artifact(format!(
            "rebuilt index maps ({} users, {} items) do not match factor matrices ({} users, {} items)",
            user_index.len(),
            item_index.len(),
            artifact.user_count(),
            artifact.item_count()
        )));
    }

    let matrix = build_interaction_matrix(interactions, &user_index, &item_index);
    let user_factors = factor_matrix(artifact.latent_dim, user_index.len(), artifact.user_factors)?;
    let item_factors = factor_matrix(artifact.latent_dim, item_index.len(), artifact.item_factors)?;

    Ok(ModelState {
        user_factors,
        item_factors,
        user_index,
        item_index,
        interactions: matrix,
        loaded_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionKind;

    fn interaction(user_id: i64, item_id: i64, action: ActionKind) -> Interaction {
        Interaction {
            user_id,
            item_id,
            weight: action.weight(),
            action,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn rebuild_maps_follow_ascending_id_order() {
        let history = vec![
            interaction(42, 300, ActionKind::Like),
            interaction(7, 100, ActionKind::View),
            interaction(42, 100, ActionKind::Post),
        ];

        let (users, items) = rebuild_index_maps(&history);
        assert_eq!(users.ids(), &[7, 42]);
        assert_eq!(items.ids(), &[100, 300]);
    }

    #[test]
    fn interaction_matrix_sums_repeat_actions() {
        let history = vec![
            interaction(1, 10, ActionKind::View),
            interaction(1, 10, ActionKind::Like),
            interaction(2, 20, ActionKind::Comment),
        ];
        let (users, items) = rebuild_index_maps(&history);
        let matrix = build_interaction_matrix(&history, &users, &items);

        let row: Vec<(usize, f64)> = matrix.row_entries(0).collect();
        assert_eq!(row, vec![(0, 5.0)]);
        assert_eq!(matrix.nnz(), 2);
    }

    #[test]
    fn bundled_assembly_produces_consistent_state() {
        let artifact = ModelArtifact {
            latent_dim: 2,
            user_factors: vec![1.0, 0.0, 0.0, 1.0],
            item_factors: vec![0.5, 0.5, 1.0, 0.0, 0.0, 1.0],
            bundle: Some(ArtifactBundle {
                user_ids: vec![7, 42],
                item_ids: vec![1, 2, 3],
                interactions: CsrMatrix::from_triplets(2, 3, vec![(1, 2, 4.0)]),
            }),
        };

        let state = assemble_bundled(artifact).unwrap();
        assert_eq!(state.latent_dim(), 2);
        assert_eq!(state.user_index.index_of(42), Some(1));
        assert_eq!(state.interactions.row_indices(1), &[2]);
    }

    #[test]
    fn bare_assembly_rejects_count_mismatch() {
        let artifact = ModelArtifact {
            latent_dim: 2,
            user_factors: vec![0.0; 6], // three users
            item_factors: vec![0.0; 4],
            bundle: None,
        };
        let history = vec![interaction(1, 10, ActionKind::View)];

        assert!(assemble_bare(artifact, &history).is_err());
    }

    #[test]
    fn store_swaps_state_wholesale() {
        let store = FactorModelStore::new();
        assert!(!store.loaded());
        assert!(store.snapshot().is_none());

        let artifact = ModelArtifact {
            latent_dim: 1,
            user_factors: vec![1.0],
            item_factors: vec![1.0, 2.0],
            bundle: Some(ArtifactBundle {
                user_ids: vec![5],
                item_ids: vec![10, 20],
                interactions: CsrMatrix::from_triplets(1, 2, vec![]),
            }),
        };
        store.install(assemble_bundled(artifact).unwrap());

        assert!(store.loaded());
        let info = store.info();
        assert_eq!(info.user_count, 1);
        assert_eq!(info.item_count, 2);
    }
}
