//! `TetherServer`: Axum HTTP + WebSocket front end for a [`Node`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tether_core::{ConnId, JsonCodec, PacketCodec};
use tether_settings::TetherSettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::node::Node;
use crate::registry::ChannelRegistry;
use crate::session::run_ws_session;
use crate::shutdown::ShutdownCoordinator;

/// Shared state for Axum handlers.
#[derive(Clone)]
struct AppState {
    node: Arc<Node>,
    codec: Arc<dyn PacketCodec>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
    max_message_size: usize,
    outbound_buffer: usize,
}

/// The multiplexing server.
pub struct TetherServer {
    settings: TetherSettings,
    node: Arc<Node>,
    codec: Arc<dyn PacketCodec>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl TetherServer {
    /// Server speaking the JSON codec. Boots the workers, so it must be
    /// called inside a Tokio runtime.
    pub fn new(settings: TetherSettings, registry: ChannelRegistry) -> Self {
        Self::with_codec(settings, registry, Arc::new(JsonCodec))
    }

    /// Server speaking `codec`.
    pub fn with_codec(
        settings: TetherSettings,
        registry: ChannelRegistry,
        codec: Arc<dyn PacketCodec>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let node = Node::start(&settings, Arc::new(registry), codec.name(), &shutdown.token());
        Self {
            settings,
            node: Arc::new(node),
            codec,
            shutdown,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the router: the WebSocket path, `/health` and `/metrics`.
    pub fn router(&self) -> Router {
        let state = AppState {
            node: self.node.clone(),
            codec: self.codec.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_message_size: self.settings.server.max_message_size,
            outbound_buffer: self.settings.server.outbound_buffer,
        };

        Router::new()
            .route(&self.settings.server.path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let bind_error = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let router = self.router();
        let token = self.shutdown.token();
        let task = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                warn!(%error, "server stopped with error");
            }
        });

        info!(
            %local_addr,
            path = %self.settings.server.path,
            workers = self.node.worker_count(),
            "tether server listening"
        );
        Ok((local_addr, task))
    }

    /// Stop accepting, close every connection and wait for all tasks.
    pub async fn stop(&self, serve_task: Option<JoinHandle<()>>, timeout: Option<Duration>) -> bool {
        let mut tasks = self.node.take_tasks();
        tasks.extend(serve_task);
        self.shutdown.graceful_shutdown(tasks, timeout).await
    }

    /// The worker node.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Settings in force.
    pub fn settings(&self) -> &TetherSettings {
        &self.settings
    }
}

/// GET {server.path}
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let Some(admission) = state.node.admit() else {
        warn!(
            active = state.node.active_connections(),
            "connection limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };
    let worker = state.node.assign().clone();
    let codec = state.codec.clone();
    let buffer = state.outbound_buffer;

    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let _admission = admission;
            run_ws_session(socket, ConnId::new(), worker, codec, buffer).await;
        })
        .into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.node.active_connections(),
        state.node.worker_count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::NoopHandler;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> TetherServer {
        let mut settings = TetherSettings::default();
        settings.server.port = 0;
        settings.cluster.workers = 2;
        let mut registry = ChannelRegistry::new();
        registry.register("lobby", NoopHandler).unwrap();
        TetherServer::new(settings, registry)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_reports_workers_and_connections() {
        let server = make_server();
        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["workers"], 2);
        assert_eq!(body["connections"], 0);
        assert!(body["uptimeSecs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_stopping() {
        let server = make_server();
        server.shutdown().shutdown();
        let (_, body) = get_json(server.router(), "/health").await;
        assert_eq!(body["status"], "stopping");
    }

    #[tokio::test]
    async fn metrics_absent_without_recorder() {
        let server = make_server();
        let (status, _) = get_json(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_rendered_with_handle() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_get_on_socket_path_is_not_upgraded() {
        let server = make_server();
        let req = Request::builder().uri("/socket").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stop_joins_workers() {
        let server = make_server();
        assert!(server.stop(None, Some(Duration::from_secs(5))).await);
        assert!(server.shutdown().is_shutting_down());
        assert!(server.node().stats().await.is_err());
    }
}
