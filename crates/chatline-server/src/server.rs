//! `ChatServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chatline_core::ConnectionId;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::assistant::AssistantBackend;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::publisher::NotificationPublisher;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;
use crate::store::ConversationStore;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Subscriber registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Notification fan-out.
    pub publisher: NotificationPublisher,
    /// Conversation storage.
    pub store: Arc<dyn ConversationStore>,
    /// Reply backend, if configured.
    pub assistant: Option<Arc<dyn AssistantBackend>>,
    /// Prometheus handle for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Per-session tuning.
    pub session: SessionConfig,
    /// Largest accepted inbound WebSocket message.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
}

/// A bound, running server.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL of the subscription endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// `http://` base URL.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for the serve loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "server task panicked");
        }
    }
}

/// The Chatline server.
pub struct ChatServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ConversationStore>,
    assistant: Option<Arc<dyn AssistantBackend>>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl ChatServer {
    /// Create a server over `store`, without an assistant.
    pub fn new(config: ServerConfig, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            store,
            assistant: None,
            metrics: None,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Generate assistant replies to user messages.
    #[must_use]
    pub fn with_assistant(mut self, assistant: Arc<dyn AssistantBackend>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    fn state(&self) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            publisher: NotificationPublisher::new(Arc::clone(&self.registry)),
            store: Arc::clone(&self.store),
            assistant: self.assistant.clone(),
            metrics: self.metrics.clone(),
            shutdown: Arc::clone(&self.shutdown),
            session: self.config.session(),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .nest("/api", routes::api_router())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "chatline server listening");
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
            info!("server stopped");
        });

        Ok(ServerHandle { addr, task })
    }

    /// Publisher for out-of-band notifications.
    pub fn publisher(&self) -> NotificationPublisher {
        NotificationPublisher::new(Arc::clone(&self.registry))
    }

    /// Subscriber registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.len(),
        state.registry.conversation_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let token = state.shutdown.token();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(
                socket,
                ConnectionId::new(),
                state.registry,
                state.session,
                token,
            )
        })
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryConversationStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_server() -> ChatServer {
        ChatServer::new(
            ServerConfig::default(),
            Arc::new(InMemoryConversationStore::new()),
        )
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let resp = get(server.router(), "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["conversations"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let resp = get(make_server().router(), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_requires_upgrade() {
        let resp = get(make_server().router(), "/ws").await;
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let resp = get(make_server().router(), "/nonexistent").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let handle = server.listen().await.unwrap();
        assert_ne!(handle.addr().port(), 0);
        assert!(handle.ws_url().ends_with("/ws"));

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle.join())
            .await
            .unwrap();
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.config().port, 0);
    }
}
