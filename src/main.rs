//! Roomcast: WebSocket upgrade router and room broadcast server
//!
//! Serves the built-in upgrade routes over one HTTP listener. With a relay
//! URL configured, broadcasts are shared with every other roomcast process
//! subscribed to the same subject.
//!
//! Usage:
//!   roomcast                                     # Default port 7070, local delivery
//!   roomcast --port 8080                         # Custom port
//!   roomcast --redis-url redis://127.0.0.1:6379  # Multi-process broadcast
//!   roomcast --config roomcast.json              # Load WebsocketConfig from JSON
//!   roomcast --middleware token --token secret   # Global middleware

use std::path::PathBuf;
use std::sync::Arc;

use axum::{Router, routing::get};
use clap::Parser;
use roomcast::app;
use roomcast_protocol::WebsocketConfig;
use roomcast_relay::BroadcastRelay;
use roomcast_server::{BroadcastHub, MiddlewareRef, RoomRegistry, Upgrader};
use roomcast_transport::{TransportConfig, TransportServer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "roomcast", about = "Roomcast: WebSocket upgrade router and room broadcast")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7070")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// JSON file holding a WebsocketConfig (`middleware`, `relay`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay URL; enables multi-process broadcast
    #[arg(long, env = "ROOMCAST_REDIS_URL")]
    redis_url: Option<String>,

    /// Relay subject broadcasts are published on
    #[arg(long)]
    relay_subject: Option<String>,

    /// Global middleware by name, applied to every route (repeatable)
    #[arg(long)]
    middleware: Vec<String>,

    /// Secret checked by the `token` middleware
    #[arg(long, env = "ROOMCAST_TOKEN")]
    token: Option<String>,

    /// Maximum concurrently open sessions
    #[arg(long, default_value = "1024")]
    max_connections: usize,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let file = cli.log_file.as_ref().and_then(|path| {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some((path, file)),
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", path.display());
                None
            }
        }
    });

    match file {
        Some((path, file)) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
            eprintln!("Logging to {}", path.display());
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// File config first, then CLI overrides.
fn load_config(cli: &Cli) -> Result<WebsocketConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => WebsocketConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => WebsocketConfig::default(),
    };
    if let Some(url) = &cli.redis_url {
        config.relay.enabled = true;
        config.relay.url = url.clone();
    }
    if let Some(subject) = &cli.relay_subject {
        config.relay.subject = subject.clone();
    }
    config.middleware.extend(cli.middleware.iter().cloned());
    Ok(config)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // Routes are fixed from here on.
    let global: Vec<MiddlewareRef> = config
        .middleware
        .iter()
        .map(|name| MiddlewareRef::named(name.as_str()))
        .collect();
    let router = match app::routes()
        .and_then(|routes| routes.commit(&global, &app::middleware(cli.token.clone())))
    {
        Ok(router) => router,
        Err(e) => {
            error!("Invalid upgrade routes: {e}");
            std::process::exit(1);
        }
    };

    let hub = Arc::new(BroadcastHub::new(Arc::new(RoomRegistry::new())));
    let upgrader = Upgrader::new(router, Arc::new(app::controllers()), hub);

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        max_connections: Some(cli.max_connections),
    };
    let routes = Router::new().route("/", get(|| async { "roomcast" }));

    let mut transport = match TransportServer::start_with_routes(transport_config, upgrader, routes).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to bind transport on {}:{}: {e}; upgrade support disabled", cli.hostname, cli.port);
            wait_for_signal().await;
            return;
        }
    };

    if config.relay.enabled {
        match BroadcastRelay::from_config(&config.relay) {
            Ok(Some(relay)) => {
                if let Err(e) = transport.start_relay(Arc::new(relay)).await {
                    warn!("Relay failed to start, using local delivery: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Invalid relay configuration, using local delivery: {e}"),
        }
    } else {
        info!("Relay disabled, broadcasts are delivered locally");
    }

    info!(
        "Roomcast running on ws://{}:{} (routes: {})",
        cli.hostname,
        transport.port(),
        transport.upgrader().router().patterns().join(", ")
    );

    wait_for_signal().await;

    info!("Shutting down...");
    transport.stop().await;
}
