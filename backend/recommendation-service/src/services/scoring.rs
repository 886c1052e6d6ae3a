//! Collaborative scoring against the loaded factor model
//!
//! Scores every item for a known user as the dot product of the item factor
//! rows with the user's factor vector, masks out items the user already
//! touched plus the caller's exclusions, and keeps the top of the ranking.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::{AppError, Result};
use crate::models::{ItemType, ScoreDiagnostics, ScoredItem, SourceTier};
use crate::services::model::ModelState;

/// Score and select recommendations for a user known to the model.
///
/// The returned scores are clipped into [0, 1]; the raw dot product is kept
/// in the diagnostics. Selection over-fetches `2 * limit` candidates so that
/// masked entries leave enough slack.
pub fn recommend_collaborative(
    model: &ModelState,
    user_id: i64,
    item_type: ItemType,
    limit: usize,
    exclude: &HashSet<i64>,
) -> Result<Vec<ScoredItem>> {
    if limit == 0 {
        return Err(AppError::Validation("limit must be positive".to_string()));
    }

    let user_idx = model
        .user_index
        .index_of(user_id)
        .ok_or_else(|| AppError::Scoring(format!("user {} not in model index", user_id)))?;

    let user_vector = model.user_factors.row(user_idx);
    let mut scores: Vec<f64> = model
        .item_factors
        .dot(&user_vector)
        .iter()
        .map(|&s| s as f64)
        .collect();

    // Mask items the user already interacted with
    for &item_idx in model.interactions.row_indices(user_idx) {
        scores[item_idx] = f64::NEG_INFINITY;
    }
    // Mask explicit exclusions
    for &item_id in exclude {
        if let Some(item_idx) = model.item_index.index_of(item_id) {
            scores[item_idx] = f64::NEG_INFINITY;
        }
    }

    let candidates = top_indices(&scores, 2 * limit);

    let mut recommendations = Vec::with_capacity(limit);
    for item_idx in candidates {
        if recommendations.len() >= limit {
            break;
        }
        let raw = scores[item_idx];
        if !raw.is_finite() {
            continue;
        }
        let Some(item_id) = model.item_index.id_at(item_idx) else {
            continue;
        };
        recommendations.push(ScoredItem {
            item_id,
            score: raw.clamp(0.0, 1.0),
            item_type,
            tier: SourceTier::Collaborative,
            diagnostics: ScoreDiagnostics {
                raw_score: raw,
                ..Default::default()
            },
            metadata: None,
        });
    }

    Ok(recommendations)
}

/// Indices of the `k` highest scores, descending. Partial selection first so
/// the full vector is never sorted.
fn top_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }

    let descending =
        |&a: &usize, &b: &usize| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal);

    let mut indices: Vec<usize> = (0..scores.len()).collect();
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, descending);
        indices.truncate(k);
    }
    indices.sort_unstable_by(descending);
    indices
}
