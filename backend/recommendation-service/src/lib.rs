pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};

// Re-export the core pipeline components
pub use services::{
    BatchOrchestrator, BatchRunSummary, BatchSettings, FactorModelStore, FileRunLog, FilterSpec,
    MemoryMonitor, ModelArtifact, ModelInfo, RecommendRequest, Recommender,
};
