/// Recommendation API handlers
///
/// Thin HTTP adapters: validate the request, delegate to the services, and
/// serialize the result. No recommendation logic lives here.
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::RecommendationStore;
use crate::error::{AppError, Result};
use crate::models::{BatchKind, ItemType, RunStatus, ScoredItem};
use crate::services::{
    BatchOrchestrator, FactorModelStore, FilterSpec, RecommendRequest, Recommender,
};

pub struct AppState {
    pub recommender: Arc<Recommender>,
    pub models: Arc<FactorModelStore>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub store: Arc<dyn RecommendationStore>,
    pub artifact_path: PathBuf,
    pub default_limit: usize,
    pub max_limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub user_id: i64,
    #[serde(rename = "type")]
    pub item_type: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FilterParams {
    pub category: Option<Vec<String>>,
    pub region: Option<Vec<String>>,
    pub min_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationBody {
    pub user_id: i64,
    #[serde(default = "default_item_type")]
    pub item_type: String,
    pub limit: Option<usize>,
    #[serde(default)]
    pub exclude_items: Vec<i64>,
    pub filters: Option<FilterParams>,
}

fn default_item_type() -> String {
    "record".to_string()
}

#[derive(Debug, Serialize)]
pub struct SimpleRecommendationItem {
    pub item_id: i64,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct SimpleRecommendationResponse {
    pub user_id: i64,
    pub item_type: ItemType,
    pub recommendations: Vec<SimpleRecommendationItem>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub user_id: i64,
    pub recommendations: Vec<ScoredItem>,
    pub total_count: usize,
    pub algorithm_used: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub model_loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct RunView {
    pub id: Option<i64>,
    pub kind: BatchKind,
    pub status: RunStatus,
    pub total_users: Option<u64>,
    pub processed_users: u64,
    pub total_recommendations: u64,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub source: &'static str,
    pub runs: Vec<RunView>,
}

#[derive(Debug, Deserialize)]
pub struct BatchTriggerQuery {
    #[serde(default = "default_batch_kind")]
    pub kind: String,
    pub user_limit: Option<usize>,
}

fn default_batch_kind() -> String {
    "incremental".to_string()
}

fn parse_item_type(raw: &str) -> Result<ItemType> {
    ItemType::parse(raw)
        .ok_or_else(|| AppError::Validation(format!("unsupported item type: {}", raw)))
}

fn validate_request(state: &AppState, user_id: i64, limit: Option<usize>) -> Result<usize> {
    if user_id <= 0 {
        return Err(AppError::Validation("user_id must be positive".to_string()));
    }
    let limit = limit.unwrap_or(state.default_limit);
    if limit == 0 || limit > state.max_limit {
        return Err(AppError::Validation(format!(
            "limit must be within 1..={}",
            state.max_limit
        )));
    }
    Ok(limit)
}

fn algorithm_used(items: &[ScoredItem]) -> String {
    items
        .first()
        .map(|i| i.tier.as_str().to_string())
        .unwrap_or_else(|| "none".to_string())
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        service: "recommendation-service",
        version: env!("CARGO_PKG_VERSION"),
        model_loaded: state.models.loaded(),
    })
}

/// GET /api/v1/recommendations?user_id=&type=&limit=
#[get("/api/v1/recommendations")]
pub async fn get_recommendations(
    query: web::Query<RecommendationQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let limit = validate_request(&state, query.user_id, query.limit)?;
    let item_type = parse_item_type(&query.item_type)?;

    debug!(
        user_id = query.user_id,
        item_type = %item_type,
        limit,
        "Recommendation request"
    );

    let items = state
        .recommender
        .recommend(&RecommendRequest {
            user_id: query.user_id,
            item_type,
            limit,
            exclude_items: Vec::new(),
            filter: None,
        })
        .await?;

    Ok(HttpResponse::Ok().json(SimpleRecommendationResponse {
        user_id: query.user_id,
        item_type,
        recommendations: items
            .into_iter()
            .map(|i| SimpleRecommendationItem {
                item_id: i.item_id,
                score: i.score,
            })
            .collect(),
    }))
}

/// POST /api/v1/recommendations with exclusions and post-filters
#[post("/api/v1/recommendations")]
pub async fn create_recommendations(
    body: web::Json<RecommendationBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let limit = validate_request(&state, body.user_id, body.limit)?;
    let item_type = parse_item_type(&body.item_type)?;

    let filter = match body.filters {
        Some(params) => Some(FilterSpec::new(
            params.category.map(|v| v.into_iter().collect::<HashSet<_>>()),
            params.region.map(|v| v.into_iter().collect::<HashSet<_>>()),
            params.min_score,
        )?),
        None => None,
    };

    let items = state
        .recommender
        .recommend(&RecommendRequest {
            user_id: body.user_id,
            item_type,
            limit,
            exclude_items: body.exclude_items,
            filter,
        })
        .await?;

    Ok(HttpResponse::Ok().json(RecommendationResponse {
        user_id: body.user_id,
        total_count: items.len(),
        algorithm_used: algorithm_used(&items),
        recommendations: items,
        generated_at: Utc::now(),
    }))
}

#[get("/api/v1/model/info")]
pub async fn get_model_info(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.models.info())
}

/// POST /api/v1/model/refresh reloads the artifact and swaps the model
#[post("/api/v1/model/refresh")]
pub async fn refresh_model(state: web::Data<AppState>) -> Result<HttpResponse> {
    let started = std::time::Instant::now();
    state
        .models
        .load(&state.artifact_path, state.store.as_ref())
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "model": state.models.info(),
        "duration_ms": started.elapsed().as_millis() as u64,
    })))
}

/// POST /api/v1/batch/trigger?kind=full|incremental|mini
#[post("/api/v1/batch/trigger")]
pub async fn trigger_batch(
    query: web::Query<BatchTriggerQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let kind = BatchKind::parse(&query.kind)
        .ok_or_else(|| AppError::Validation(format!("unsupported batch kind: {}", query.kind)))?;
    if query.user_limit.is_some() && kind != BatchKind::Mini {
        return Err(AppError::Validation(
            "user_limit applies to mini runs only".to_string(),
        ));
    }

    let summary = state.orchestrator.run(kind, query.user_limit).await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// POST /api/v1/batch/stop requests cooperative cancellation
#[post("/api/v1/batch/stop")]
pub async fn stop_batch(state: web::Data<AppState>) -> HttpResponse {
    state.orchestrator.request_stop();
    HttpResponse::Accepted().json(serde_json::json!({
        "status": "stop_requested",
        "running": state.orchestrator.is_running(),
    }))
}

/// GET /api/v1/batch/status returns recent runs, falling back to the file
/// log when the durable store is unreachable
#[get("/api/v1/batch/status")]
pub async fn get_batch_status(state: web::Data<AppState>) -> Result<HttpResponse> {
    match state.store.recent_runs(10).await {
        Ok(runs) => Ok(HttpResponse::Ok().json(BatchStatusResponse {
            source: "store",
            runs: runs
                .into_iter()
                .map(|r| RunView {
                    id: Some(r.id),
                    kind: r.kind,
                    status: r.status,
                    total_users: Some(r.total_users),
                    processed_users: r.processed_users,
                    total_recommendations: r.total_recommendations,
                    finished_at: r.finished_at,
                    error: r.error,
                })
                .collect(),
        })),
        Err(err) => {
            warn!(error = %err, "Run query failed, serving file log records");
            let records = state.orchestrator.file_records(10)?;
            Ok(HttpResponse::Ok().json(BatchStatusResponse {
                source: "file",
                runs: records
                    .into_iter()
                    .map(|r| RunView {
                        id: None,
                        kind: r.kind,
                        status: r.status,
                        total_users: None,
                        processed_users: r.processed_users,
                        total_recommendations: r.total_recommendations,
                        finished_at: Some(r.timestamp),
                        error: r.error,
                    })
                    .collect(),
            }))
        }
    }
}
