//! WebSocket integration tests for the `/api/v1/ws/jobs/{id}/progress`
//! endpoint, run against a real listener since the upgrade handshake
//! needs a live connection.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use common::{body_json, get, post_json};
use futures::StreamExt;
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

fn backtest_payload() -> serde_json::Value {
    json!({
        "symbol": "BTCUSDT",
        "exchange": "binance",
        "strategy": "grid",
        "start": "2024-01-01",
        "end": "2024-06-30",
    })
}

/// Bind an ephemeral port and serve the router in the background.
async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Submit a backtest and return its job id.
async fn submit_backtest(app: Router) -> String {
    let response = post_json(app, "/api/v1/backtest/run", backtest_payload()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    json["data"]["id"].as_str().unwrap().to_string()
}

/// Collect every `progress` frame until the server closes the stream.
async fn collect_progress_frames(addr: SocketAddr, id: &str) -> Vec<serde_json::Value> {
    let url = format!("ws://{addr}/api/v1/ws/jobs/{id}/progress");
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    let mut frames = Vec::new();
    while let Some(message) = ws.next().await {
        match message.unwrap() {
            Message::Text(text) => {
                let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame["kind"], "progress");
                frames.push(frame["payload"].clone());
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    frames
}

// ---------------------------------------------------------------------------
// Test: connecting to an already-terminal job delivers one final snapshot
// and leaves no open hub scope behind
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminal_job_gets_snapshot_and_no_lingering_scope() {
    let harness = common::build_test_app();
    let addr = serve(harness.app.clone()).await;

    let id = submit_backtest(harness.app.clone()).await;

    // The stub backtest finishes almost immediately; wait it out over HTTP.
    for _ in 0..100 {
        let response = get(harness.app.clone(), &format!("/api/v1/backtest/jobs/{id}")).await;
        let json = body_json(response).await;
        if json["data"]["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let frames = collect_progress_frames(addr, &id).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["status"], "completed");
    assert_eq!(frames[0]["progress"], 100);

    // The runner closed its scope when the job finished; connecting after
    // the fact must not resurrect the topic.
    assert_eq!(harness.state.hub.scope_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: a live job streams a snapshot plus monotonic progress ending in a
// terminal frame
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_job_streams_progress_to_terminal() {
    let harness = common::build_test_app();
    // Slow the backtest down enough for the subscriber to attach mid-run.
    common::write_script(
        &harness.state.config.bot_dir.join("backtest.py"),
        "sleep 0.2\necho \"progress=40\"\nsleep 0.2\necho '{\"ok\": true}'\n",
    );
    let addr = serve(harness.app.clone()).await;

    let id = submit_backtest(harness.app.clone()).await;
    let frames = collect_progress_frames(addr, &id).await;

    assert!(!frames.is_empty());
    let mut last_progress = -1;
    for frame in &frames {
        let progress = frame["progress"].as_i64().unwrap();
        assert!(progress >= last_progress, "progress went backwards: {frames:?}");
        last_progress = progress;
    }
    let last = frames.last().unwrap();
    assert_eq!(last["status"], "completed");
    assert_eq!(last["progress"], 100);
}

// ---------------------------------------------------------------------------
// Test: unknown job id is rejected before the upgrade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_rejects_handshake() {
    let harness = common::build_test_app();
    let addr = serve(harness.app.clone()).await;

    let url = format!(
        "ws://{addr}/api/v1/ws/jobs/{}/progress",
        uuid::Uuid::new_v4()
    );
    let err = connect_async(url.as_str()).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 404);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}
