use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    inspect,
    ports::PortRange,
    scanner::{ScanConfig, Scanner, SharedProgress},
    types::{ScanReport, ScanTarget},
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // shared mutable state for progress/results
}

impl AppState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState {
                status: Status { state: "idle".into(), ..Status::default() },
                report: None,
                progress: None,
                cancel: None,
                generation: 0,
            })),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ServerState {
    status: Status,
    report: Option<ScanReport>,
    progress: Option<SharedProgress>,
    cancel: Option<CancellationToken>,
    // Bumped per scan so a superseded scan does not overwrite newer state.
    generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub host: Option<String>,
    pub total: u64,
    pub scanned: u64,
    pub open: u64,
    pub state: String, // "idle" | "running" | "done" | "cancelled"
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub host: String,
    /// `start-end` or a single port; defaults to `0-10000`.
    #[serde(default)]
    pub ports: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub banner_timeout_ms: Option<u64>,
    #[serde(default)]
    pub identify: Option<bool>,
}

impl ScanRequest {
    fn into_parts(self) -> Result<(ScanTarget, ScanConfig), String> {
        let range = match self.ports.as_deref() {
            Some(raw) => raw.parse::<PortRange>().map_err(|e| e.to_string())?,
            None => PortRange::default(),
        };
        let target = ScanTarget::new(self.host, range).map_err(|e| e.to_string())?;

        let defaults = ScanConfig::default();
        let config = ScanConfig {
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            connect_timeout: self
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            banner_timeout: self
                .banner_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.banner_timeout),
            max_banner_bytes: defaults.max_banner_bytes,
            identify: self.identify.unwrap_or(defaults.identify),
        };
        // Overrides may shorten the deadlines, never extend them.
        let config = ScanConfig {
            connect_timeout: config.effective_connect_timeout(),
            banner_timeout: config.effective_banner_timeout(),
            ..config
        };
        Ok((target, config))
    }
}

/// JSON API: `POST /api/scan`, `POST /api/cancel`, `GET /api/status`, `GET /api/results`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .route("/results", get(get_results))
        .with_state(state);

    Router::new().nest("/api", api).layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str) -> Result<()> {
    let app = router(AppState::new());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving scan API");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let (scanned, open) = if let Some(p) = s.progress.as_ref() {
        (
            p.scanned_done.load(std::sync::atomic::Ordering::Relaxed),
            p.open_count.load(std::sync::atomic::Ordering::Relaxed),
        )
    } else {
        (s.status.scanned, s.status.open)
    };
    let out = Status { scanned, open, ..s.status.clone() };
    (StatusCode::OK, Json(out))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.report.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.cancel.as_ref() {
        Some(c) => {
            c.cancel();
            StatusCode::ACCEPTED
        }
        None => StatusCode::CONFLICT,
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let (target, config) = match req.into_parts() {
        Ok(parts) => parts,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let total = target.range().len() as u64;
    let progress = SharedProgress::new();
    let cancel = CancellationToken::new();
    let status = Status {
        host: Some(target.host().to_string()),
        total,
        scanned: 0,
        open: 0,
        state: "running".into(),
    };

    let generation = {
        let mut s = app.inner.write().await;
        // Cancel any existing scan
        if let Some(c) = s.cancel.take() {
            c.cancel();
        }
        s.generation += 1;
        s.status = status.clone();
        s.report = None;
        s.progress = Some(progress.clone());
        s.cancel = Some(cancel.clone());
        s.generation
    };

    let app2 = app.clone();
    tokio::spawn(async move {
        let mut scanner = Scanner::new(config);
        if config.identify {
            scanner = scanner.with_inspector(inspect::default_inspector());
        }
        let report = scanner.scan_with_shared(&target, cancel, progress).await;

        let mut s = app2.inner.write().await;
        if s.generation != generation {
            return;
        }
        s.status.scanned = report.entries.len() as u64;
        s.status.open = report.open_count;
        s.status.state = if report.cancelled { "cancelled" } else { "done" }.into();
        s.report = Some(report);
        s.progress = None;
        s.cancel = None;
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}
