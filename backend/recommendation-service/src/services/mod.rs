pub mod batch;
pub mod filter;
pub mod memory;
pub mod model;
pub mod recommender;
pub mod run_log;
pub mod scoring;

pub use batch::{BatchOrchestrator, BatchRunSummary, BatchSettings};
pub use filter::FilterSpec;
pub use memory::MemoryMonitor;
pub use model::{FactorModelStore, ModelArtifact, ModelInfo, ModelState};
pub use recommender::{RecommendRequest, Recommender};
pub use run_log::{FileRunLog, RunRecord};
