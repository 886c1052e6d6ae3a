use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type a recommendation can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Record,
    Place,
    Plan,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Place => "place",
            Self::Plan => "plan",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "record" => Some(Self::Record),
            "place" => Some(Self::Place),
            "plan" => Some(Self::Plan),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User action recorded against an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Post,
    Like,
    Comment,
    View,
}

impl ActionKind {
    /// Interaction weight for this action kind.
    ///
    /// Authorship outweighs likes, likes outweigh comments, views count least.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Post => 5.0,
            Self::Like => 4.0,
            Self::Comment => 3.0,
            Self::View => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Like => "like",
            Self::Comment => "comment",
            Self::View => "view",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "post" => Some(Self::Post),
            "like" => Some(Self::Like),
            "comment" => Some(Self::Comment),
            "view" => Some(Self::View),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single user-item interaction event.
///
/// Multiple interactions per (user, item) pair may exist; aggregates are
/// computed on demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: i64,
    pub item_id: i64,
    pub weight: f64,
    pub action: ActionKind,
    pub occurred_at: DateTime<Utc>,
}

/// Which strategy produced a scored item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Collaborative,
    RealtimeUser,
    PopularityRanked,
    PopularityMatrix,
    LastResort,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collaborative => "collaborative",
            Self::RealtimeUser => "realtime_user",
            Self::PopularityRanked => "popularity_ranked",
            Self::PopularityMatrix => "popularity_matrix",
            Self::LastResort => "last_resort",
        }
    }
}

impl std::fmt::Display for SourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic details carried alongside a score for observability
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreDiagnostics {
    /// Raw model or formula output before clipping into [0, 1]
    pub raw_score: f64,
    /// 0-based rank in the source list, for rank-derived tiers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    /// Interaction volume behind the score, for popularity tiers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_count: Option<u64>,
}

/// Item metadata fetched from the data store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub region: Option<String>,
    pub like_count: i64,
    pub comment_count: i64,
}

impl ItemMetadata {
    /// Engagement-derived popularity rank (higher = more popular)
    pub fn popularity_rank(&self) -> i64 {
        self.like_count + self.comment_count
    }
}

/// One scored recommendation candidate, produced transiently per request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: i64,
    /// Normalized score in [0, 1]
    pub score: f64,
    pub item_type: ItemType,
    pub tier: SourceTier,
    pub diagnostics: ScoreDiagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ItemMetadata>,
}

/// Persisted recommendation row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub user_id: i64,
    pub item_id: i64,
    pub item_type: ItemType,
    pub score: f64,
    pub generated_at: DateTime<Utc>,
}

/// Kind of batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Full,
    Incremental,
    Mini,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Mini => "mini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            "mini" => Some(Self::Mini),
            _ => None,
        }
    }
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a batch run.
///
/// `Running` is the only non-terminal state; counters move only while in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of one batch execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: i64,
    pub kind: BatchKind,
    pub total_users: u64,
    pub processed_users: u64,
    pub total_recommendations: u64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_weights_are_ordered() {
        assert!(ActionKind::Post.weight() > ActionKind::Like.weight());
        assert!(ActionKind::Like.weight() > ActionKind::Comment.weight());
        assert!(ActionKind::Comment.weight() > ActionKind::View.weight());
    }

    #[test]
    fn enum_round_trips() {
        for kind in [BatchKind::Full, BatchKind::Incremental, BatchKind::Mini] {
            assert_eq!(BatchKind::parse(kind.as_str()), Some(kind));
        }
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Stopped,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ItemType::parse("place"), Some(ItemType::Place));
        assert_eq!(ItemType::parse("unknown"), None);
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
    }
}
