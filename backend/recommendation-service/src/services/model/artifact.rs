use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::sparse::CsrMatrix;
use crate::error::{AppError, Result};

/// Serialized factor model blob.
///
/// Two shapes are accepted: a bundled artifact carrying the index maps and
/// the training-time interaction matrix, or a bare artifact with factor
/// matrices only, in which case the maps and matrix are reconstructed from
/// interaction history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub latent_dim: usize,
    /// Row-major user factor matrix, len = user_count * latent_dim
    pub user_factors: Vec<f32>,
    /// Row-major item factor matrix, len = item_count * latent_dim
    pub item_factors: Vec<f32>,
    pub bundle: Option<ArtifactBundle>,
}

/// Index maps + interaction matrix captured at training time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBundle {
    /// External user ids in matrix row order (ascending)
    pub user_ids: Vec<i64>,
    /// External item ids in matrix row order (ascending)
    pub item_ids: Vec<i64>,
    pub interactions: CsrMatrix,
}

impl ModelArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .map_err(|e| AppError::Artifact(format!("read {}: {}", path.display(), e)))?;
        let artifact: ModelArtifact = bincode::deserialize(&data)
            .map_err(|e| AppError::Artifact(format!("decode {}: {}", path.display(), e)))?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let data = bincode::serialize(self)
            .map_err(|e| AppError::Artifact(format!("encode: {}", e)))?;
        fs::write(path, data)
            .map_err(|e| AppError::Artifact(format!("write {}: {}", path.display(), e)))?;
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.user_factors.len() / self.latent_dim.max(1)
    }

    pub fn item_count(&self) -> usize {
        self.item_factors.len() / self.latent_dim.max(1)
    }

    fn validate(&self) -> Result<()> {
        if self.latent_dim == 0 {
            return Err(AppError::Artifact("latent dimension is zero".to_string()));
        }
        if self.user_factors.len() % self.latent_dim != 0
            || self.item_factors.len() % self.latent_dim != 0
        {
            return Err(AppError::Artifact(
                "factor matrix length is not a multiple of the latent dimension".to_string(),
            ));
        }
        if let Some(bundle) = &self.bundle {
            if bundle.user_ids.len() != self.user_count()
                || bundle.item_ids.len() != self.item_count()
            {
                return Err(AppError::Artifact(format!(
                    "bundle id counts ({} users, {} items) do not match factor matrices ({} users, {} items)",
                    bundle.user_ids.len(),
                    bundle.item_ids.len(),
                    self.user_count(),
                    self.item_count()
                )));
            }
            if bundle.interactions.rows() != self.user_count()
                || bundle.interactions.cols() != self.item_count()
            {
                return Err(AppError::Artifact(
                    "bundled interaction matrix shape does not match factor matrices".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_misaligned_factor_lengths() {
        let artifact = ModelArtifact {
            latent_dim: 4,
            user_factors: vec![0.0; 10],
            item_factors: vec![0.0; 8],
            bundle: None,
        };
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn rejects_bundle_shape_mismatch() {
        let artifact = ModelArtifact {
            latent_dim: 2,
            user_factors: vec![0.0; 4],
            item_factors: vec![0.0; 6],
            bundle: Some(ArtifactBundle {
                user_ids: vec![1],
                item_ids: vec![10, 11, 12],
                interactions: CsrMatrix::from_triplets(2, 3, vec![]),
            }),
        };
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn bundled_artifact_survives_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factors.bin");

        let artifact = ModelArtifact {
            latent_dim: 2,
            user_factors: vec![0.1, 0.2, 0.3, 0.4],
            item_factors: vec![1.0, 0.0, 0.0, 1.0, 0.5, 0.5],
            bundle: Some(ArtifactBundle {
                user_ids: vec![7, 42],
                item_ids: vec![1, 2, 3],
                interactions: CsrMatrix::from_triplets(2, 3, vec![(0, 1, 4.0), (1, 0, 5.0)]),
            }),
        };
        artifact.write(&path).unwrap();

        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded.latent_dim, 2);
        assert_eq!(loaded.user_count(), 2);
        assert_eq!(loaded.item_count(), 3);
        assert_eq!(loaded.bundle.unwrap().interactions.nnz(), 2);
    }
}
