use axum::{
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{debug, info_span, Instrument};

use crate::channel::{watch_disconnect, LogChannel};
use crate::jobs::{summarize_jobs, JobsResponse};
use crate::session::{LogStreamSession, StreamSettings};
use crate::upstream::{BuildRef, UpstreamHandle};

#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamHandle,
    pub settings: StreamSettings,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(upstream: UpstreamHandle, settings: StreamSettings) -> Self {
        Self {
            upstream,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: PrometheusHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/jobs", get(jobs_handler))
        .route("/ws/logs/:job_name/:build_number", get(log_stream_handler))
        .with_state(state)
}

/// Browser access for the configured origins, with credentials.
pub fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let upstream = if state.upstream.is_available() {
        "available"
    } else {
        "unavailable"
    };
    Json(json!({ "status": "ok", "upstream": upstream }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn jobs_handler(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(summarize_jobs(&state.upstream).await)
}

async fn log_stream_handler(
    State(state): State<AppState>,
    Path((job_name, build_number)): Path<(String, u64)>,
    ws: WebSocketUpgrade,
) -> Response {
    let build = BuildRef::new(job_name, build_number);
    ws.on_upgrade(move |socket| stream_build_log(socket, state, build))
}

async fn stream_build_log(socket: WebSocket, state: AppState, build: BuildRef) {
    let span = info_span!("log_stream", build = %build);

    let (sink, inbound) = socket.split();
    let disconnect = CancellationToken::new();
    let watcher = tokio::spawn(watch_disconnect(inbound, disconnect.clone()));

    let channel = LogChannel::new(sink, disconnect.clone());
    let outcome = LogStreamSession::new(state.upstream.clone(), build, state.settings)
        .run(channel)
        .instrument(span)
        .await;

    disconnect.cancel();
    if let Err(err) = watcher.await {
        debug!(error = %err, "disconnect watcher ended abnormally");
    }
    debug!(outcome = outcome.metric_label(), "log stream task finished");
}
