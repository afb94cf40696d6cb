use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use host_scan_rs::server::{router, AppState, Status};
use host_scan_rs::types::ScanReport;
use tokio::net::TcpListener;
use tower::ServiceExt;

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

#[tokio::test]
async fn idle_server_has_no_results() {
    let app = router(AppState::new());

    let (code, body) = send(&app, get("/api/status")).await;
    assert_eq!(code, StatusCode::OK);
    let status: Status = serde_json::from_slice(&body).unwrap();
    assert_eq!(status.state, "idle");

    let (code, _) = send(&app, get("/api/results")).await;
    assert_eq!(code, StatusCode::NO_CONTENT);

    let (code, _) = send(&app, post_json("/api/cancel", "{}")).await;
    assert_eq!(code, StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_range_is_bad_request() {
    let app = router(AppState::new());
    let (code, body) = send(&app, post_json("/api/scan", r#"{"host":"127.0.0.1","ports":"10-1"}"#)).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).contains("invalid port range"));
}

#[tokio::test]
async fn scan_runs_to_completion() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            drop(sock);
        }
    });

    let app = router(AppState::new());
    let req = format!(
        r#"{{"host":"127.0.0.1","ports":"{port}","identify":false,"banner_timeout_ms":200}}"#
    );
    let (code, body) = send(&app, post_json("/api/scan", &req)).await;
    assert_eq!(code, StatusCode::ACCEPTED);
    let status: Status = serde_json::from_slice(&body).unwrap();
    assert_eq!((status.total, status.state.as_str()), (1, "running"));

    let mut done = false;
    for _ in 0..100 {
        let (_, body) = send(&app, get("/api/status")).await;
        let status: Status = serde_json::from_slice(&body).unwrap();
        if status.state == "done" {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(done, "scan did not finish");

    let (code, body) = send(&app, get("/api/results")).await;
    assert_eq!(code, StatusCode::OK);
    let report: ScanReport = serde_json::from_slice(&body).unwrap();
    assert_eq!(report.entries.len(), 1);
    assert!(report.entries[0].probe.open);
}
