#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use gridpilot_api::config::ServerConfig;
use gridpilot_api::router::build_app_router;
use gridpilot_api::state::AppState;

/// A fully wired test application.
///
/// `app` is the production router over a state whose tool scripts are shell
/// stubs in a temp directory; `state` gives tests direct access to the
/// stores for polling. The temp directory lives as long as the harness.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _dir: tempfile::TempDir,
}

/// Build a test `ServerConfig` rooted in the given temp directory.
///
/// `/bin/sh` stands in for the python interpreter so the stub "scripts"
/// are plain shell.
pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        python_bin: "/bin/sh".into(),
        bot_dir: dir.join("bot"),
        artifact_dir: dir.join("run"),
        stop_grace_secs: 1,
        metrics_interval_secs: 1,
    }
}

/// Build the full application (production router and middleware stack) with
/// stub tool scripts:
///
/// - `bot.py` sleeps, so started instances stay Running until stopped;
/// - `backtest.py` reports progress and emits a small JSON result;
/// - `optimize.py` sleeps before finishing, so cancel/not-ready paths are
///   reachable.
pub fn build_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let bot_dir = dir.path().join("bot");
    std::fs::create_dir_all(&bot_dir).unwrap();

    write_script(&bot_dir.join("bot.py"), "echo started\nsleep 30\n");
    write_script(
        &bot_dir.join("backtest.py"),
        "echo \"progress=50\"\necho '{\"sharpe\": 1.2}'\n",
    );
    write_script(
        &bot_dir.join("optimize.py"),
        "echo \"progress=10\"\nsleep 30\necho '{}'\n",
    );

    let config = test_config(dir.path());
    let state = AppState::new(config.clone());
    let app = build_app_router(state.clone(), &config);

    TestApp {
        app,
        state,
        _dir: dir,
    }
}

pub fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body into JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the standard error envelope and return its `code`.
pub async fn error_code(response: Response<Body>, expected_status: StatusCode) -> String {
    assert_eq!(response.status(), expected_status);
    let json = body_json(response).await;
    assert!(json["error"].is_string(), "missing error message: {json}");
    json["code"].as_str().expect("missing error code").to_string()
}
