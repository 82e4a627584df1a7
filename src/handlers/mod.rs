//! HTTP handlers. Each one decodes its arguments, calls into the core
//! components and wraps the result in a `{ "success": true, ... }` body.

pub mod agent;
pub mod files;
pub mod watch;

use axum::{Json, extract::FromRequest, extract::State};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::BridgeError;
use crate::paths::{PathValidation, TrustMode};

/// JSON body extractor whose rejections use the bridge error format.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(BridgeError))]
pub struct ApiJson<T>(pub T);

/// Successful response envelope.
#[derive(Debug, Serialize)]
pub struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

pub fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        data,
    })
}

pub type ApiResult<T> = Result<Json<Success<T>>, BridgeError>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub root: String,
    pub launcher: &'static str,
    pub watchers: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Success<HealthResponse>> {
    success(HealthResponse {
        status: "ok",
        root: crate::paths::display_path(&state.root_dir),
        launcher: state.runner.launcher_name(),
        watchers: state.watchers.active_keys().await.len(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ValidatePathRequest {
    pub path: String,
    pub mode: TrustMode,
}

/// POST /api/path/validate
pub async fn validate_path(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ValidatePathRequest>,
) -> Json<Success<PathValidation>> {
    success(state.paths.validate(&request.path, request.mode).into())
}
