use axum::extract::State;
use serde::Deserialize;

use super::{ApiJson, ApiResult, success};
use crate::AppState;
use crate::runner::AgentOutput;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub scope_directory: String,
}

/// POST /api/agent/execute
pub async fn execute(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ExecuteRequest>,
) -> ApiResult<AgentOutput> {
    let output = state
        .runner
        .execute(&request.prompt, &request.scope_directory)
        .await?;
    Ok(success(output))
}
