use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use index::{Entity, GraphStats, StoreError};
use ingest::{ChunkerConfig, IngestError};
use query::{QueryError, RetrievalContext};

use crate::metrics::MetricsSnapshot;
use crate::pipeline::{Answer, BuildReport, ChunkFailure, Pipeline, PipelineError};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub model_name: String,
    /// Parent of every build's cancellation token; fired on shutdown
    pub shutdown: CancellationToken,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    store: String,
    model: String,
}

#[derive(Deserialize)]
struct BuildRequest {
    #[serde(default)]
    doc_id: Option<String>,
    text: String,
    #[serde(default)]
    chunking: Option<ChunkerConfig>,
}

#[derive(Deserialize)]
struct IngestRequest {
    path: String,
    #[serde(default)]
    chunking: Option<ChunkerConfig>,
}

#[derive(Serialize, Deserialize)]
pub struct BuildResponse {
    pub run_id: Uuid,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub failures: Vec<ChunkFailure>,
    pub cancelled: bool,
    pub stats: GraphStats,
}

impl From<BuildReport> for BuildResponse {
    fn from(report: BuildReport) -> Self {
        Self {
            run_id: report.run_id,
            chunks_total: report.chunks_total,
            chunks_succeeded: report.chunks_succeeded,
            failures: report.failures,
            cancelled: report.cancelled,
            stats: report.graph.stats(),
        }
    }
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

/// Maps pipeline failures onto HTTP status codes
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::Ingest(IngestError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            PipelineError::Ingest(IngestError::Io { .. } | IngestError::Walk(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Ingest(_) => StatusCode::BAD_REQUEST,
            PipelineError::Query(QueryError::NoSeedEntity(_)) => StatusCode::NOT_FOUND,
            PipelineError::Query(QueryError::InvalidConfig(_)) => StatusCode::BAD_REQUEST,
            PipelineError::Query(QueryError::Model(_)) => StatusCode::BAD_GATEWAY,
            PipelineError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            PipelineError::Store(_) | PipelineError::Query(QueryError::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/build", post(build_graph))
        .route("/ingest", post(ingest_path))
        .route("/query", post(answer_query))
        .route("/answer", post(answer))
        .route("/entities/:id", get(get_entity))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = match state.pipeline.stats().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let status = if store == "ok" { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        store,
        model: state.model_name.clone(),
    })
}

async fn build_graph(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> Result<Json<BuildResponse>, ApiError> {
    let doc_id = req.doc_id.unwrap_or_else(|| ingest::generate_doc_id(&req.text));
    let chunking = req.chunking.unwrap_or(state.pipeline.settings().chunking);

    let report = state
        .pipeline
        .build_graph(&doc_id, &req.text, chunking, state.shutdown.child_token())
        .await?;
    info!(run_id = %report.run_id, "Build request completed");
    Ok(Json(report.into()))
}

async fn ingest_path(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<BuildResponse>, ApiError> {
    let path = PathBuf::from(&req.path);
    let chunking = req.chunking.unwrap_or(state.pipeline.settings().chunking);

    let report = state
        .pipeline
        .ingest_path(&path, chunking, state.shutdown.child_token())
        .await?;
    Ok(Json(report.into()))
}

async fn answer_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<RetrievalContext>, ApiError> {
    Ok(Json(state.pipeline.answer_query(&req.query).await?))
}

async fn answer(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Result<Json<Answer>, ApiError> {
    Ok(Json(state.pipeline.answer(&req.query).await?))
}

async fn get_entity(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Entity>, ApiError> {
    match state.pipeline.entity(&id).await? {
        Some(entity) => Ok(Json(entity)),
        None => Err(PipelineError::Store(StoreError::NotFound(id)).into()),
    }
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<GraphStats>, ApiError> {
    Ok(Json(state.pipeline.stats().await?))
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.pipeline.metrics().snapshot())
}
