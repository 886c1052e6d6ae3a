use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub recommend: RecommendConfig,
    pub batch: BatchConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the factor model artifact blob
    pub artifact_path: String,
    /// Trailing window of interaction history used for index rebuilds
    pub interaction_window_days: i64,
    /// Hard cap on interaction rows pulled from the store
    pub max_interactions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Users persisted per atomic chunk in full/incremental runs
    pub chunk_size: usize,
    /// Smaller chunk for mini runs to bound peak memory further
    pub mini_chunk_size: usize,
    /// Default user ceiling for mini runs when none is requested
    pub mini_user_limit: usize,
    /// Recommendations generated per user in a batch run
    pub per_user_limit: usize,
    /// Process RSS ceiling in megabytes; 0 disables the guard
    pub memory_ceiling_mb: u64,
    /// Append-only structured run log, redundant to the durable store
    pub run_log_path: String,
    /// Activity window that selects users for incremental runs
    pub incremental_window_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub full_interval_hours: u64,
    pub incremental_interval_hours: u64,
    /// Run a full batch immediately on startup
    pub run_full_on_start: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                port: std::env::var("APP_PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()?,
                log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            },
            model: ModelConfig {
                artifact_path: std::env::var("MODEL_ARTIFACT_PATH")
                    .unwrap_or_else(|_| "./models/factors.bin".to_string()),
                interaction_window_days: env_or("MODEL_INTERACTION_WINDOW_DAYS", 180),
                max_interactions: env_or("MODEL_MAX_INTERACTIONS", 50_000),
            },
            recommend: RecommendConfig {
                default_limit: env_or("RECOMMEND_DEFAULT_LIMIT", 10),
                max_limit: env_or("RECOMMEND_MAX_LIMIT", 50),
            },
            batch: BatchConfig {
                chunk_size: env_or("BATCH_CHUNK_SIZE", 100),
                mini_chunk_size: env_or("BATCH_MINI_CHUNK_SIZE", 25),
                mini_user_limit: env_or("BATCH_MINI_USER_LIMIT", 100),
                per_user_limit: env_or("BATCH_PER_USER_LIMIT", 10),
                memory_ceiling_mb: env_or("BATCH_MEMORY_CEILING_MB", 0),
                run_log_path: std::env::var("BATCH_RUN_LOG_PATH")
                    .unwrap_or_else(|_| "./batch_runs.log".to_string()),
                incremental_window_hours: env_or("BATCH_INCREMENTAL_WINDOW_HOURS", 24),
            },
            scheduler: SchedulerConfig {
                enabled: env_or("SCHEDULER_ENABLED", false),
                full_interval_hours: env_or("SCHEDULER_FULL_INTERVAL_HOURS", 24),
                incremental_interval_hours: env_or("SCHEDULER_INCREMENTAL_INTERVAL_HOURS", 6),
                run_full_on_start: env_or("SCHEDULER_RUN_FULL_ON_START", false),
            },
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
