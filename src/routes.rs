use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::handlers::{self, agent, files, watch};
use crate::rate_limit;

/// Bridge API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Directory watching
        .route("/api/watch/start", post(watch::start_watch))
        .route("/api/watch/stop", post(watch::stop_watch))
        .route("/api/watch/events", get(watch::watch_events))
        .route(
            "/api/files",
            get(watch::list_files_query).post(watch::list_files_body),
        )
        // File operations
        .route("/api/file/read", post(files::read_file))
        .route("/api/file/save", post(files::save_file))
        .route("/api/file/load", post(files::load_file))
        .route("/api/file/delete", post(files::delete_file))
        .route("/api/files/move", post(files::move_files))
        .route("/api/automation/save", post(files::save_automation_file))
        // Directory operations
        .route("/api/directory/create", post(files::create_directory))
        .route("/api/directory/ensure", post(files::ensure_directory))
        .route("/api/directory/list", post(files::list_directory))
        .route("/api/scope/files", post(files::list_scope_files))
        // Path checks
        .route("/api/path/validate", post(handlers::validate_path))
        // Agent
        .route("/api/agent/execute", post(agent::execute))
}

/// Full application: routes, rate limiting, CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
