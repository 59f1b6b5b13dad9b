//! HTTP facade: request/response shapes, handlers, and the request
//! event-log middleware. Every operation is stateless beyond delegating to
//! the registry.

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use mlserve_core::{metrics, EventLog};

use crate::error::ServeError;
use crate::normalize::{self, RawRecord};
use crate::pipeline::ScoreKind;
use crate::registry::ModelRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub events: EventLog,
    pub started: Instant,
    pub version: String,
    pub git_sha: String,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub features: RawRecord,
}

#[derive(Debug, Deserialize)]
pub struct PredictBatchRequest {
    pub rows: Vec<RawRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ReloadParams {
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub ts: f64,
    pub cols: Option<usize>,
    pub model_exists: bool,
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub required_columns: Vec<String>,
    pub numeric_columns: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: &'static str,
    pub model: String,
}

/// Error wrapper carrying the HTTP mapping of [`ServeError`].
#[derive(Debug)]
pub struct ApiError(pub ServeError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.0.status()
    }
}

impl From<ServeError> for ApiError {
    fn from(e: ServeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/schema", get(get_schema))
        .route("/predict", post(predict))
        .route("/predict_batch", post(predict_batch))
        .route("/reload", post(reload))
        .route("/metrics", get(metrics_text))
        .layer(middleware::from_fn_with_state(state.clone(), access_log))
        .with_state(state)
}

/// Never fails, even with nothing loaded.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let current = state.registry.current();
    Json(HealthResponse {
        status: "ok",
        model: state.registry.model_name(),
        ts: epoch_secs(),
        cols: current
            .as_ref()
            .map(|s| s.schema.required_fields.len())
            .filter(|n| *n > 0),
        model_exists: current.is_some(),
    })
}

pub async fn get_schema(State(state): State<AppState>) -> Json<SchemaResponse> {
    match state.registry.current() {
        Some(s) => Json(SchemaResponse {
            required_columns: s.schema.required_fields.clone(),
            numeric_columns: s.schema.sorted_numeric(),
        }),
        None => Json(SchemaResponse {
            required_columns: Vec::new(),
            numeric_columns: Vec::new(),
        }),
    }
}

pub async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<Value>, ApiError> {
    let model = state.registry.ensure_loaded().await?;
    let batch = normalize::normalize_batch(std::slice::from_ref(&req.features), &model.schema);
    match model.score_kind {
        ScoreKind::Probability => {
            let proba = model
                .pipeline
                .predict_proba(&batch)
                .map_err(|e| ServeError::Scoring(e.to_string()))?;
            let p = proba
                .first()
                .copied()
                .ok_or_else(|| ServeError::Scoring("empty batch".into()))?;
            Ok(Json(json!({ "pred_proba": p })))
        }
        ScoreKind::Label => {
            let labels = model
                .pipeline
                .predict_label(&batch)
                .map_err(|e| ServeError::Scoring(e.to_string()))?;
            let label = labels
                .into_iter()
                .next()
                .ok_or_else(|| ServeError::Scoring("empty batch".into()))?;
            Ok(Json(json!({ "pred": label })))
        }
    }
}

/// One normalization pass over the whole batch, so every row shares the
/// same column alignment and the output keeps the input row order.
pub async fn predict_batch(
    State(state): State<AppState>,
    Json(req): Json<PredictBatchRequest>,
) -> Result<Json<Value>, ApiError> {
    let model = state.registry.ensure_loaded().await?;
    let batch = normalize::normalize_batch(&req.rows, &model.schema);
    match model.score_kind {
        ScoreKind::Probability => {
            let proba = model
                .pipeline
                .predict_proba(&batch)
                .map_err(|e| ServeError::Scoring(e.to_string()))?;
            Ok(Json(json!({ "pred_proba": proba })))
        }
        ScoreKind::Label => {
            let labels = model
                .pipeline
                .predict_label(&batch)
                .map_err(|e| ServeError::Scoring(e.to_string()))?;
            Ok(Json(json!({ "pred": labels })))
        }
    }
}

pub async fn reload(
    State(state): State<AppState>,
    Query(params): Query<ReloadParams>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let explicit = params.path.map(PathBuf::from);
    let model = state.registry.reload(explicit).await?;
    Ok(Json(ReloadResponse {
        status: "reloaded",
        model: model.model_name(),
    }))
}

pub async fn metrics_text(State(state): State<AppState>) -> Response {
    let current = state.registry.current();
    metrics::set_version_info(&state.version, &state.git_sha);
    metrics::observe(
        state.started.elapsed().as_secs() as i64,
        current.is_some(),
        current
            .as_ref()
            .map(|s| s.schema.required_fields.len())
            .unwrap_or(0),
    );
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics::render(),
    )
        .into_response()
}

/// Appends one `request` event per served request.
async fn access_log(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let resp = next.run(req).await;
    state.events.append(
        "request",
        json!({
            "method": method,
            "path": path,
            "query": query,
            "status": resp.status().as_u16(),
            "latency_ms": started.elapsed().as_millis() as u64,
            "model": state.registry.model_name(),
        }),
    );
    resp
}

fn epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
