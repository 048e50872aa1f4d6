//! HTTP server hosting the upgrade interceptor.
//!
//! Owns the listener, the health route, and the shutdown order for the
//! sessions it upgraded and the relay that feeds them.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use roomcast_relay::{BroadcastRelay, RelayError};
use roomcast_server::Upgrader;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crate::upgrade::UpgradeLayer;

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Maximum concurrently open sessions
    pub max_connections: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 7070,
            hostname: "127.0.0.1".into(),
            max_connections: Some(1024),
        }
    }
}

/// Shared state for the HTTP routes.
struct AppState {
    upgrader: Arc<Upgrader>,
}

/// The transport server: one listener, its upgraded sessions, and the relay.
pub struct TransportServer {
    upgrader: Arc<Upgrader>,
    relay: Option<Arc<BroadcastRelay>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl TransportServer {
    /// Start serving upgrades (plus `/health`) for `upgrader`.
    pub async fn start(
        config: TransportConfig,
        upgrader: Upgrader,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_with_routes(config, upgrader, Router::new()).await
    }

    /// Start with extra application routes. Plain HTTP requests reach them
    /// untouched; upgrade requests are intercepted on every path. `routes`
    /// must not set its own fallback.
    pub async fn start_with_routes(
        config: TransportConfig,
        upgrader: Upgrader,
        routes: Router,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let upgrader = Arc::new(upgrader.with_max_sessions(config.max_connections));
        let app = build_app(upgrader.clone(), routes);

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!(
            "Roomcast listening on ws://{}:{} ({} upgrade route(s))",
            config.hostname,
            actual_port,
            upgrader.router().len()
        );

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .ok();
        });

        Ok(Self {
            upgrader,
            relay: None,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    /// Start `relay` and route this server's broadcasts through it. On error
    /// the server keeps delivering locally.
    pub async fn start_relay(&mut self, relay: Arc<BroadcastRelay>) -> Result<(), RelayError> {
        relay.start(self.upgrader.hub()).await?;
        self.relay = Some(relay);
        Ok(())
    }

    pub fn upgrader(&self) -> &Arc<Upgrader> {
        &self.upgrader
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully stop: close every session (1000, "Server shutting down"),
    /// then the listener, then the relay.
    pub async fn stop(&mut self) {
        self.upgrader.shutdown();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        if let Some(relay) = self.relay.take() {
            relay.shutdown(self.upgrader.hub()).await;
        }
        info!("Roomcast transport server stopped");
    }
}

/// Build the full application: `routes`, `/health`, a 404 fallback, and
/// upgrade interception over all of them.
pub fn build_app(upgrader: Arc<Upgrader>, routes: Router) -> Router {
    let state = Arc::new(AppState {
        upgrader: upgrader.clone(),
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .merge(routes)
        .fallback(not_found);

    UpgradeLayer::new(upgrader).apply(app)
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.upgrader.registry().stats();
    let status = if state.upgrader.is_accepting() {
        "ok"
    } else {
        "shutting_down"
    };
    Json(json!({
        "status": status,
        "sessions": stats.sessions,
        "rooms": stats.rooms,
    }))
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
