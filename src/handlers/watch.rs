use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{ApiJson, ApiResult, success};
use crate::AppState;
use crate::watcher::{FileChange, FileInfo, WatchStarted};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWatchRequest {
    pub directory: String,
    pub owner_id: String,
    pub purpose_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartWatchResponse {
    pub started: bool,
    #[serde(flatten)]
    pub watch: WatchStarted,
}

#[derive(Debug, Deserialize)]
pub struct StopWatchRequest {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct StopWatchResponse {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesRequest {
    pub directory: String,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only forward changes for this watch key
    pub key: Option<String>,
}

/// POST /api/watch/start
pub async fn start_watch(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<StartWatchRequest>,
) -> ApiResult<StartWatchResponse> {
    let watch = state
        .watchers
        .start_watch(&request.directory, &request.owner_id, &request.purpose_id)
        .await?;

    Ok(success(StartWatchResponse {
        started: true,
        watch,
    }))
}

/// POST /api/watch/stop
pub async fn stop_watch(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<StopWatchRequest>,
) -> ApiResult<StopWatchResponse> {
    state.watchers.stop_watch(&request.key).await?;
    Ok(success(StopWatchResponse { key: request.key }))
}

/// GET /api/files?directory=...
pub async fn list_files_query(
    State(state): State<AppState>,
    Query(request): Query<ListFilesRequest>,
) -> ApiResult<ListFilesResponse> {
    list_files(&state, &request.directory).await
}

/// POST /api/files
pub async fn list_files_body(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ListFilesRequest>,
) -> ApiResult<ListFilesResponse> {
    list_files(&state, &request.directory).await
}

async fn list_files(state: &AppState, directory: &str) -> ApiResult<ListFilesResponse> {
    let files = state.watchers.list_files(directory).await?;
    Ok(success(ListFilesResponse { files }))
}

/// GET /api/watch/events - WebSocket stream of detected changes
pub async fn watch_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let changes = state.watchers.subscribe();
    ws.on_upgrade(move |socket| events_socket(socket, changes, query.key))
}

async fn events_socket(
    mut socket: WebSocket,
    mut changes: tokio::sync::broadcast::Receiver<FileChange>,
    key: Option<String>,
) {
    info!(
        "Change stream opened{}",
        key.as_deref().map(|k| format!(" for {k}")).unwrap_or_default()
    );

    loop {
        tokio::select! {
            change = changes.recv() => {
                match change {
                    Ok(change) => {
                        if key.as_ref().is_some_and(|k| *k != change.key) {
                            continue;
                        }
                        let Ok(data) = serde_json::to_string(&change) else {
                            continue;
                        };
                        if socket.send(Message::Text(data.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Change stream lagged, {} event(s) dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("WebSocket receive error: {:?}", err);
                        break;
                    }
                }
            }
        }
    }

    debug!("Change stream closed");
}
