//! Post-filtering of scored recommendations
//!
//! A typed filter specification validated at construction; filtering is a
//! pure pass over an already-ordered result and never re-ranks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ScoredItem;

/// Compositional post-filter: an item passes iff every present criterion
/// matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    pub category: Option<HashSet<String>>,
    pub region: Option<HashSet<String>>,
    pub min_score: Option<f64>,
}

impl FilterSpec {
    pub fn new(
        category: Option<HashSet<String>>,
        region: Option<HashSet<String>>,
        min_score: Option<f64>,
    ) -> Result<Self> {
        if let Some(set) = &category {
            if set.is_empty() {
                return Err(AppError::Validation(
                    "category filter must not be empty".to_string(),
                ));
            }
        }
        if let Some(set) = &region {
            if set.is_empty() {
                return Err(AppError::Validation(
                    "region filter must not be empty".to_string(),
                ));
            }
        }
        if let Some(score) = min_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(AppError::Validation(format!(
                    "min_score must be within [0, 1], got {}",
                    score
                )));
            }
        }
        Ok(Self {
            category,
            region,
            min_score,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.region.is_none() && self.min_score.is_none()
    }

    pub fn matches(&self, item: &ScoredItem) -> bool {
        if let Some(categories) = &self.category {
            let passes = item
                .metadata
                .as_ref()
                .and_then(|m| m.category.as_deref())
                .map(|c| categories.contains(c))
                .unwrap_or(false);
            if !passes {
                return false;
            }
        }
        if let Some(regions) = &self.region {
            let passes = item
                .metadata
                .as_ref()
                .and_then(|m| m.region.as_deref())
                .map(|r| regions.contains(r))
                .unwrap_or(false);
            if !passes {
                return false;
            }
        }
        if let Some(min_score) = self.min_score {
            if item.score < min_score {
                return false;
            }
        }
        true
    }
}

/// Apply the filter, preserving the incoming order
pub fn apply_filter(items: Vec<ScoredItem>, spec: &FilterSpec) -> Vec<ScoredItem> {
    if spec.is_empty() {
        return items;
    }
    items.into_iter().filter(|item| spec.matches(item)).collect()
}
