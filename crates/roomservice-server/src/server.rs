//! `RoomserviceServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use roomservice_core::SessionId;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::orders::{NotifyingOrders, OrderObserver, OrderService};
use crate::routes;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::liveness::LivenessMonitor;
use crate::websocket::registry::SessionRegistry;
use crate::websocket::socket::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Open sessions and broadcast fan-out.
    pub registry: Arc<SessionRegistry>,
    /// Order collaborator wrapped with post-commit notifications.
    pub orders: Arc<dyn OrderService>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The notification server.
pub struct RoomserviceServer {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    orders: Arc<dyn OrderService>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RoomserviceServer {
    /// Create a server over `store`.
    ///
    /// The store is wrapped so that committed creates and updates are
    /// broadcast to every open session.
    pub fn new(config: ServerConfig, store: Arc<dyn OrderService>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let observers = vec![registry.clone() as Arc<dyn OrderObserver>];
        let orders: Arc<dyn OrderService> = Arc::new(NotifyingOrders::new(store, observers));
        Self {
            config: Arc::new(config),
            registry,
            orders,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            orders: self.orders.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route(&self.config.ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/orders", post(routes::create_order))
            .route("/api/orders/{id}", get(routes::get_order))
            .route("/api/orders/{id}/status", patch(routes::update_order_status))
            .with_state(state)
            .layer(CorsLayer::permissive())
    }

    /// Bind, then serve until shutdown.
    ///
    /// Spawns the HTTP server and the liveness monitor. Returns the bound
    /// address and a handle that completes once both have stopped.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, ws_path = %self.config.ws_path, "roomservice server listening");

        let monitor = LivenessMonitor::new(self.registry.clone(), self.config.heartbeat_interval());
        let monitor_handle = tokio::spawn(monitor.run(self.shutdown.token()));

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
            let _ = monitor_handle.await;
            info!("roomservice server stopped");
        });

        Ok((addr, handle))
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Notifying order service.
    pub fn orders(&self) -> &Arc<dyn OrderService> {
        &self.orders
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET {ws_path}: upgrade to a notification session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let session_config = state.config.session_config();
    let registry = state.registry.clone();
    let shutdown = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, SessionId::new(), registry, session_config, shutdown)
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.connection_count().await;
    let draining = state.shutdown.is_shutting_down();
    Json(health::health_check(state.start_time, connections, draining))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
