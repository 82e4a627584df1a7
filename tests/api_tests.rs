//! API integration tests.

use axum::http::{StatusCode, header};
use serde_json::json;

mod common;
use common::{body_json, test_bridge, test_bridge_with, test_config};

#[tokio::test]
async fn test_health_endpoint() {
    let bridge = test_bridge();

    let response = bridge.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["launcher"], "native");
    assert_eq!(json["watchers"], 0);
}

#[tokio::test]
async fn test_validate_path_reports_both_modes() {
    let bridge = test_bridge();

    let json = bridge
        .post_json(
            "/api/path/validate",
            json!({ "path": "specs/../specs/a.json", "mode": "sandboxed" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["valid"], true);
    assert!(json["path"].as_str().unwrap().ends_with("specs/a.json"));

    let json = bridge
        .post_json(
            "/api/path/validate",
            json!({ "path": "../outside", "mode": "sandboxed" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["valid"], false);
    assert_eq!(json["code"], "ACCESS_DENIED");

    let outside = tempfile::TempDir::new().unwrap();
    let json = bridge
        .post_json(
            "/api/path/validate",
            json!({ "path": outside.path().to_string_lossy(), "mode": "trustedExternal" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["valid"], true);
}

#[tokio::test]
async fn test_read_outside_root_is_forbidden() {
    let bridge = test_bridge();

    let json = bridge
        .post_json(
            "/api/file/read",
            json!({ "path": "../../etc/passwd" }),
            StatusCode::FORBIDDEN,
        )
        .await;
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "ACCESS_DENIED");
}

#[tokio::test]
async fn test_read_file_and_scoped_read() {
    let bridge = test_bridge();
    std::fs::write(bridge.path("notes.txt"), "# hello").unwrap();

    let json = bridge
        .post_json("/api/file/read", json!({ "path": "notes.txt" }), StatusCode::OK)
        .await;
    assert_eq!(json["content"], "# hello");
    assert_eq!(json["size"], 7);
    assert_eq!(json["mimeType"], "text/plain");

    let scope = tempfile::TempDir::new().unwrap();
    std::fs::write(scope.path().join("context.txt"), "scoped").unwrap();
    let scope_dir = scope.path().to_string_lossy().to_string();

    let json = bridge
        .post_json(
            "/api/file/read",
            json!({ "path": "context.txt", "scopeDirectory": scope_dir }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["content"], "scoped");

    bridge
        .post_json(
            "/api/file/read",
            json!({ "path": "../escape.txt", "scopeDirectory": scope_dir }),
            StatusCode::FORBIDDEN,
        )
        .await;
}

#[tokio::test]
async fn test_read_missing_file_is_not_found() {
    let bridge = test_bridge();

    let json = bridge
        .post_json(
            "/api/file/read",
            json!({ "path": "nope.txt" }),
            StatusCode::NOT_FOUND,
        )
        .await;
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let bridge = test_bridge();

    let response = bridge
        .post_raw("/api/file/read", "{not json".to_string())
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_start_watch_twice_keeps_one_handle() {
    let bridge = test_bridge();
    std::fs::create_dir(bridge.path("automations")).unwrap();

    let request = json!({
        "directory": "automations",
        "ownerId": "editor",
        "purposeId": "automation-list",
    });

    let first = bridge
        .post_json("/api/watch/start", request.clone(), StatusCode::OK)
        .await;
    assert_eq!(first["started"], true);
    assert_eq!(first["alreadyWatching"], false);

    let second = bridge
        .post_json("/api/watch/start", request, StatusCode::OK)
        .await;
    assert_eq!(second["alreadyWatching"], true);
    assert_eq!(first["key"], second["key"]);

    assert_eq!(bridge.state.watchers.active_keys().await.len(), 1);

    let key = first["key"].as_str().unwrap();
    bridge
        .post_json("/api/watch/stop", json!({ "key": key }), StatusCode::OK)
        .await;
    let json = bridge
        .post_json(
            "/api/watch/stop",
            json!({ "key": key }),
            StatusCode::NOT_FOUND,
        )
        .await;
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_start_watch_rejects_missing_and_file_targets() {
    let bridge = test_bridge();
    std::fs::write(bridge.path("plain.txt"), "x").unwrap();

    let json = bridge
        .post_json(
            "/api/watch/start",
            json!({ "directory": "missing", "ownerId": "o", "purposeId": "p" }),
            StatusCode::NOT_FOUND,
        )
        .await;
    assert_eq!(json["code"], "NOT_FOUND");

    let json = bridge
        .post_json(
            "/api/watch/start",
            json!({ "directory": "plain.txt", "ownerId": "o", "purposeId": "p" }),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(json["code"], "NOT_A_DIRECTORY");
}

#[tokio::test]
async fn test_list_files_get_and_post() {
    let bridge = test_bridge();
    std::fs::create_dir_all(bridge.path("automations/nested")).unwrap();
    std::fs::write(bridge.path("automations/b.json"), "{}").unwrap();
    std::fs::write(bridge.path("automations/a.json"), "[]").unwrap();

    let response = bridge.get("/api/files?directory=automations").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let names: Vec<&str> = json["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a.json", "b.json"]);

    let json = bridge
        .post_json(
            "/api/files",
            json!({ "directory": "automations" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["files"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_rate_limit_returns_retry_after() {
    let mut config = test_config();
    config.rate_limit.max_requests = 2;
    let bridge = test_bridge_with(config);

    for _ in 0..2 {
        let response = bridge.get("/api/files?directory=.").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = bridge.get("/api/files?directory=.").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let json = body_json(response).await;
    assert_eq!(json["code"], "RATE_LIMITED");

    // Health stays reachable while the client is throttled.
    let response = bridge.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_save_and_load_specification() {
    let bridge = test_bridge();

    let document = json!([
        { "name": "Research", "pages": [{ "name": "Intro", "prompt": "hi" }, { "name": "Body" }] }
    ]);

    let json = bridge
        .post_json(
            "/api/file/save",
            json!({ "filename": "research", "content": document }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["path"], "specs/research.json");
    assert_eq!(json["pageCount"], 2);
    assert!(bridge.path("specs/research.json").is_file());

    let json = bridge
        .post_json(
            "/api/file/load",
            json!({ "filename": "research.json" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["legacy"], false);
    assert_eq!(json["data"][0]["pages"][0]["prompt"], "hi");
}

#[tokio::test]
async fn test_load_accepts_legacy_pages() {
    let bridge = test_bridge();
    std::fs::create_dir(bridge.path("specs")).unwrap();
    std::fs::write(
        bridge.path("specs/old.json"),
        r#"[{"name": "Only page"}]"#,
    )
    .unwrap();

    let json = bridge
        .post_json(
            "/api/file/load",
            json!({ "filename": "old" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["legacy"], true);
}

#[tokio::test]
async fn test_invalid_specifications_are_rejected() {
    let bridge = test_bridge();

    let json = bridge
        .post_json(
            "/api/file/save",
            json!({ "filename": "bad", "content": { "name": "not an array" } }),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(!bridge.path("specs/bad.json").exists());

    std::fs::create_dir(bridge.path("specs")).unwrap();
    std::fs::write(
        bridge.path("specs/broken.json"),
        r#"[{"name": "P", "pages": "nope"}]"#,
    )
    .unwrap();
    bridge
        .post_json(
            "/api/file/load",
            json!({ "filename": "broken.json" }),
            StatusCode::BAD_REQUEST,
        )
        .await;
}

#[tokio::test]
async fn test_directory_lifecycle() {
    let bridge = test_bridge();

    bridge
        .post_json(
            "/api/directory/create",
            json!({ "path": "work" }),
            StatusCode::OK,
        )
        .await;
    let json = bridge
        .post_json(
            "/api/directory/create",
            json!({ "path": "work" }),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(json["code"], "VALIDATION_ERROR");

    // Create never makes missing parents; ensure does.
    bridge
        .post_json(
            "/api/directory/create",
            json!({ "path": "absent/child" }),
            StatusCode::NOT_FOUND,
        )
        .await;
    assert!(!bridge.path("absent").exists());

    let json = bridge
        .post_json(
            "/api/directory/ensure",
            json!({ "path": "work/a/b" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["created"], true);
    let json = bridge
        .post_json(
            "/api/directory/ensure",
            json!({ "path": "work/a/b" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["created"], false);

    std::fs::write(bridge.path("work/z.txt"), "z").unwrap();
    let json = bridge
        .post_json(
            "/api/directory/list",
            json!({ "path": "work" }),
            StatusCode::OK,
        )
        .await;
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries[0]["name"], "a");
    assert_eq!(entries[0]["isDirectory"], true);
    assert_eq!(entries[1]["name"], "z.txt");
}

#[tokio::test]
async fn test_move_files_validates_before_moving() {
    let bridge = test_bridge();
    std::fs::create_dir(bridge.path("dest")).unwrap();
    std::fs::write(bridge.path("one.txt"), "1").unwrap();
    std::fs::write(bridge.path("two.txt"), "2").unwrap();

    bridge
        .post_json(
            "/api/files/move",
            json!({ "files": ["one.txt", "../outside.txt"], "destination": "dest" }),
            StatusCode::FORBIDDEN,
        )
        .await;
    assert!(bridge.path("one.txt").exists());

    let json = bridge
        .post_json(
            "/api/files/move",
            json!({ "files": ["one.txt", "two.txt"], "destination": "dest" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["moved"], json!(["dest/one.txt", "dest/two.txt"]));
    assert!(bridge.path("dest/two.txt").exists());
    assert!(!bridge.path("two.txt").exists());
}

#[tokio::test]
async fn test_delete_file() {
    let bridge = test_bridge();
    std::fs::write(bridge.path("gone.txt"), "x").unwrap();

    bridge
        .post_json(
            "/api/file/delete",
            json!({ "path": "gone.txt" }),
            StatusCode::OK,
        )
        .await;
    assert!(!bridge.path("gone.txt").exists());

    let json = bridge
        .post_json("/api/file/delete", json!({ "path": "." }), StatusCode::FORBIDDEN)
        .await;
    assert_eq!(json["code"], "ACCESS_DENIED");
}

#[tokio::test]
async fn test_save_automation_sanitizes_filename() {
    let bridge = test_bridge();

    let json = bridge
        .post_json(
            "/api/automation/save",
            json!({ "directory": "automations", "filename": "../nightly.yaml", "content": "on: push" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["path"], "automations/_nightly.yaml");
    assert_eq!(
        std::fs::read_to_string(bridge.path("automations/_nightly.yaml")).unwrap(),
        "on: push"
    );
}

#[tokio::test]
async fn test_scope_files_skip_hidden_dirs() {
    let bridge = test_bridge();
    let scope = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(scope.path().join("src")).unwrap();
    std::fs::create_dir_all(scope.path().join("node_modules/pkg")).unwrap();
    std::fs::write(scope.path().join("src/main.rs"), "fn main() {}").unwrap();
    std::fs::write(scope.path().join("node_modules/pkg/index.js"), "").unwrap();

    let json = bridge
        .post_json(
            "/api/scope/files",
            json!({ "scopeDirectory": scope.path().to_string_lossy() }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["truncated"], false);
    let paths: Vec<&str> = json["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["src/main.rs"]);
}

#[tokio::test]
async fn test_agent_requires_prompt_and_credential() {
    let bridge = test_bridge();
    let scope = bridge.state.root_dir.to_string_lossy().to_string();

    let json = bridge
        .post_json(
            "/api/agent/execute",
            json!({ "prompt": "  ", "scopeDirectory": scope }),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(json["code"], "VALIDATION_ERROR");

    let json = bridge
        .post_json(
            "/api/agent/execute",
            json!({ "prompt": "hello", "scopeDirectory": "/definitely/not/here" }),
            StatusCode::NOT_FOUND,
        )
        .await;
    assert_eq!(json["code"], "NOT_FOUND");

    let json = bridge
        .post_json(
            "/api/agent/execute",
            json!({ "prompt": "hello", "scopeDirectory": scope }),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .await;
    assert_eq!(json["code"], "CONFIG_ERROR");
}

#[cfg(unix)]
#[tokio::test]
async fn test_agent_pipes_prompt_through_stdin() {
    let mut config = test_config();
    config.agent.program = "cat".to_string();
    config.agent.args = Vec::new();
    config.agent.credential_env = "PATH".to_string();
    let bridge = test_bridge_with(config);
    let scope = bridge.state.root_dir.to_string_lossy().to_string();

    let json = bridge
        .post_json(
            "/api/agent/execute",
            json!({ "prompt": "summarize $(rm -rf /) 'quoted'\n", "scopeDirectory": scope }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(json["success"], true);
    assert_eq!(json["output"], "summarize $(rm -rf /) 'quoted'");
}
