use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Bijection between external ids and dense 0-based matrix indices.
///
/// Rebuilt from the sorted set of distinct ids seen in interaction history;
/// indices are assigned in ascending id order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexMap {
    forward: HashMap<i64, usize>,
    reverse: Vec<i64>,
}

impl IndexMap {
    /// Build from an arbitrary id sequence; duplicates collapse, order is
    /// normalized to ascending ids.
    pub fn from_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut reverse: Vec<i64> = ids.into_iter().collect();
        reverse.sort_unstable();
        reverse.dedup();

        let forward = reverse
            .iter()
            .enumerate()
            .map(|(idx, &id)| (id, idx))
            .collect();

        Self { forward, reverse }
    }

    pub fn index_of(&self, id: i64) -> Option<usize> {
        self.forward.get(&id).copied()
    }

    pub fn id_at(&self, index: usize) -> Option<i64> {
        self.reverse.get(index).copied()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.forward.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Ids in index order (ascending by construction)
    pub fn ids(&self) -> &[i64] {
        &self.reverse
    }
}
