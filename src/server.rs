use crate::{
    error::Error,
    explain::{ExplainError, GlobalExplanation},
    registry::ModelStatus,
    service::PredictionService,
    types::{DataSource, PredictionRequest, PredictionResponse},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc};
use tower_http::trace::TraceLayer;

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Clone)]
pub struct AppState {
    pub svc: Arc<PredictionService>,
    pub default_model: Arc<str>,
}

#[derive(Deserialize, Debug)]
pub struct ModelQuery {
    model: Option<String>,
}

impl ModelQuery {
    fn resolve(self, state: &AppState) -> String {
        self.model.unwrap_or_else(|| state.default_model.to_string())
    }
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Ok(PredictionResponse),
    Err { error: String },
}

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    models: usize,
    default_model: String,
    model_source: DataSource,
    lookup_source: DataSource,
    demo_mode: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/predict/batch", post(predict_batch))
        .route("/health", get(health))
        .route("/models/status", get(models_status))
        .route("/models/:name/importance", get(importance))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn reject(e: &Error) -> ApiError {
    let status = match e {
        Error::ModelNotFound(_) => StatusCode::NOT_FOUND,
        Error::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        e if e.is_invalid_input() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("prediction failed: {}", e);
    }
    (status, Json(json!({ "error": e.to_string() })))
}

async fn predict(
    State(state): State<AppState>,
    Query(q): Query<ModelQuery>,
    Json(req): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let model = q.resolve(&state);
    let svc = Arc::clone(&state.svc);
    let out = tokio::task::spawn_blocking(move || svc.predict_position(&req, &model))
        .await
        .map_err(|e| reject(&Error::Worker(e.to_string())))?;
    out.map(Json).map_err(|e| reject(&e))
}

async fn predict_batch(
    State(state): State<AppState>,
    Query(q): Query<ModelQuery>,
    Json(reqs): Json<Vec<PredictionRequest>>,
) -> Result<Json<Vec<BatchItem>>, ApiError> {
    let model = q.resolve(&state);
    let items = Arc::clone(&state.svc)
        .predict_batch(reqs, model)
        .await
        .map_err(|e| reject(&e))?
        .into_iter()
        .map(|r| match r {
            Ok(resp) => BatchItem::Ok(resp),
            Err(e) => BatchItem::Err {
                error: e.to_string(),
            },
        })
        .collect();
    Ok(Json(items))
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let model_source = state.svc.registry().source();
    let lookup_source = state.svc.engineer().tables().source();
    Json(Health {
        status: "ok",
        models: state.svc.registry().names().len(),
        default_model: state.default_model.to_string(),
        model_source,
        lookup_source,
        demo_mode: model_source == DataSource::Synthetic || lookup_source == DataSource::Synthetic,
    })
}

async fn models_status(State(state): State<AppState>) -> Json<BTreeMap<String, ModelStatus>> {
    Json(state.svc.registry().status())
}

async fn importance(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<GlobalExplanation>, ApiError> {
    let svc = Arc::clone(&state.svc);
    let out = tokio::task::spawn_blocking(move || svc.global_importance(&name))
        .await
        .map_err(|e| reject(&Error::Worker(e.to_string())))?;
    out.map(Json).map_err(|e| match e {
        ExplainError::Model(inner) => reject(&inner),
        ExplainError::NoRows | ExplainError::Unsupported(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": e.to_string() })),
        ),
        other => {
            tracing::error!("importance failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": other.to_string() })),
            )
        }
    })
}
