//! Test utilities and common setup.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use pipeline_bridge::{AppState, Config, routes, runner::NativeShell};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// A bridge rooted at a fresh temporary project directory.
pub struct TestBridge {
    pub root: TempDir,
    pub state: AppState,
    pub app: Router,
}

impl TestBridge {
    pub fn path(&self, relative: &str) -> std::path::PathBuf {
        self.state.root_dir.join(relative)
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method(Method::GET)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn post(&self, uri: &str, body: Value) -> Response {
        self.post_raw(uri, serde_json::to_string(&body).unwrap())
            .await
    }

    pub async fn post_raw(&self, uri: &str, body: String) -> Response {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method(Method::POST)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// POST and decode, asserting the expected status.
    pub async fn post_json(&self, uri: &str, body: Value, status: StatusCode) -> Value {
        let response = self.post(uri, body).await;
        assert_eq!(response.status(), status, "unexpected status for {uri}");
        body_json(response).await
    }
}

pub async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Configuration whose agent credential is never present.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.agent.credential_env = "PIPELINE_BRIDGE_TEST_CREDENTIAL_NEVER_SET".to_string();
    config
}

pub fn test_bridge() -> TestBridge {
    test_bridge_with(test_config())
}

pub fn test_bridge_with(config: Config) -> TestBridge {
    let root = TempDir::new().unwrap();
    let root_dir = root.path().canonicalize().unwrap();
    let state = AppState::new(root_dir, config, Arc::new(NativeShell));
    let app = routes::app(state.clone());
    TestBridge { root, state, app }
}
