use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recommendation_service::config::Config;
use recommendation_service::db::{PgStore, RecommendationStore};
use recommendation_service::handlers::{
    create_recommendations, get_batch_status, get_model_info, get_recommendations, health,
    refresh_model, stop_batch, trigger_batch, AppState,
};
use recommendation_service::jobs::{BatchScheduler, SchedulerSettings, SystemClock};
use recommendation_service::models::BatchKind;
use recommendation_service::services::{
    BatchOrchestrator, BatchSettings, FactorModelStore, FileRunLog, MemoryMonitor, Recommender,
};

enum Mode {
    Serve,
    Batch(BatchKind),
}

struct CliArgs {
    mode: Mode,
    user_limit: Option<usize>,
}

fn parse_args() -> io::Result<CliArgs> {
    let mut mode = Mode::Serve;
    let mut user_limit = None;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--mode" => {
                let value = iter
                    .next()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "--mode needs a value"))?;
                mode = match value.as_str() {
                    "serve" => Mode::Serve,
                    "batch-full" => Mode::Batch(BatchKind::Full),
                    "batch-incremental" => Mode::Batch(BatchKind::Incremental),
                    "batch-mini" => Mode::Batch(BatchKind::Mini),
                    other => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("unsupported mode: {}", other),
                        ))
                    }
                };
            }
            "--user-limit" => {
                user_limit = iter.next().and_then(|v| v.parse().ok());
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported argument: {}", other),
                ));
            }
        }
    }

    Ok(CliArgs { mode, user_limit })
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = parse_args()?;
    let config = Config::from_env().expect("Failed to load configuration");

    tracing::info!(
        "Starting recommendation-service v{}",
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!("Environment: {}", config.app.env);

    let db_config = db_pool::DbConfig {
        service_name: "recommendation-service".to_string(),
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..db_pool::DbConfig::default()
    };
    let pool = db_pool::create_pool(db_config)
        .await
        .expect("Failed to create database pool");

    let store: Arc<dyn RecommendationStore> = Arc::new(PgStore::new(
        pool,
        config.model.interaction_window_days,
        config.model.max_interactions,
        config.batch.incremental_window_hours,
    ));

    let models = Arc::new(FactorModelStore::new());
    let artifact_path = PathBuf::from(&config.model.artifact_path);
    match models.load(Path::new(&artifact_path), store.as_ref()).await {
        Ok(()) => {}
        Err(err) => {
            // Not fatal: the chain serves popularity tiers until a reload
            tracing::warn!(
                path = %artifact_path.display(),
                error = %err,
                "Factor model unavailable, starting without collaborative scoring"
            );
        }
    }

    let recommender = Arc::new(Recommender::new(store.clone(), models.clone()));
    let orchestrator = Arc::new(BatchOrchestrator::new(
        store.clone(),
        recommender.clone(),
        FileRunLog::new(&config.batch.run_log_path),
        MemoryMonitor::new(config.batch.memory_ceiling_mb),
        BatchSettings {
            chunk_size: config.batch.chunk_size,
            mini_chunk_size: config.batch.mini_chunk_size,
            mini_user_limit: config.batch.mini_user_limit,
            per_user_limit: config.batch.per_user_limit,
            ..BatchSettings::default()
        },
    ));

    match cli.mode {
        Mode::Batch(kind) => {
            let summary = orchestrator
                .run(kind, cli.user_limit)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            if summary.status != recommendation_service::models::RunStatus::Completed {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "batch run ended with status {}: {}",
                        summary.status,
                        summary.error.unwrap_or_default()
                    ),
                ));
            }
            Ok(())
        }
        Mode::Serve => {
            if config.scheduler.enabled {
                let scheduler = BatchScheduler::new(
                    orchestrator.clone(),
                    Arc::new(SystemClock),
                    SchedulerSettings {
                        full_interval: Duration::from_secs(
                            config.scheduler.full_interval_hours * 3600,
                        ),
                        incremental_interval: Duration::from_secs(
                            config.scheduler.incremental_interval_hours * 3600,
                        ),
                        run_full_on_start: config.scheduler.run_full_on_start,
                    },
                    Arc::new(AtomicBool::new(false)),
                );
                tokio::spawn(async move { scheduler.run().await });
            }

            let state = web::Data::new(AppState {
                recommender,
                models,
                orchestrator,
                store,
                artifact_path,
                default_limit: config.recommend.default_limit,
                max_limit: config.recommend.max_limit,
            });

            HttpServer::new(move || {
                App::new()
                    .app_data(state.clone())
                    .service(health)
                    .service(get_recommendations)
                    .service(create_recommendations)
                    .service(get_model_info)
                    .service(refresh_model)
                    .service(trigger_batch)
                    .service(stop_batch)
                    .service(get_batch_status)
            })
            .bind(format!("0.0.0.0:{}", config.app.port))?
            .run()
            .await
        }
    }
}
