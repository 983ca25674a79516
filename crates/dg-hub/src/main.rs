//! # dg-hub — DIRGE Diagnostics Hub
//!
//! The remote-caller surface over the event store and query engine:
//!
//! - `POST /api/query` — buffered query execution (REST).
//! - `GET  /ws/query` — streamed query execution (WebSocket).
//! - `POST /api/events` — event ingestion.
//! - `GET  /api/status` — uptime, per-partition counts, effective limits.
//!
//! The engine itself is synchronous; handlers bridge to it with
//! `spawn_blocking`, and the WebSocket path feeds a bounded channel sink
//! so a departed client aborts the engine mid-stream.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dg_query::{QueryEngine, QueryLimits};
use dg_store::EventStore;

mod api;
mod ws;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "dg-hub", version, about = "DIRGE Diagnostics Hub")]
struct Args {
    /// Server bind address (overrides the config file).
    #[arg(long)]
    bind: Option<String>,

    /// Event store directory (overrides the config file).
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Path to config file.
    #[arg(long, default_value = "dg-hub.toml")]
    config: PathBuf,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    query: QueryLimits,
    #[serde(default)]
    store: StoreConfig,
}

#[derive(Deserialize, Clone)]
struct ServerConfig {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_cors")]
    cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors: default_cors(),
        }
    }
}

#[derive(Deserialize, Clone)]
struct StoreConfig {
    #[serde(default = "default_store_dir")]
    dir: PathBuf,
    #[serde(default = "default_journal")]
    journal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            journal: default_journal(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_cors() -> bool {
    true
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("dirge-store")
}

fn default_journal() -> bool {
    true
}

fn load_config(path: &PathBuf) -> Config {
    match std::fs::read_to_string(path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(%error, "config file unreadable, using defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

// =============================================================================
// App State
// =============================================================================

pub struct AppState {
    pub store: Arc<EventStore>,
    pub engine: Arc<QueryEngine>,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dg_hub=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args.config);

    let store_dir = args.store_dir.unwrap_or_else(|| config.store.dir.clone());
    let store = if config.store.journal {
        match EventStore::open(&store_dir) {
            Ok(store) => store,
            Err(error) => {
                tracing::error!(%error, dir = %store_dir.display(), "cannot open event store");
                std::process::exit(1);
            }
        }
    } else {
        EventStore::new()
    };

    let state = Arc::new(AppState {
        store: Arc::new(store),
        engine: Arc::new(QueryEngine::new(config.query.clone())),
        start_time: Instant::now(),
    });

    let mut app = Router::new()
        .route("/api/query", post(api::execute_query))
        .route("/api/events", post(api::ingest_events))
        .route("/api/status", get(api::status))
        .route("/ws/query", get(ws::ws_query))
        .with_state(state);
    if config.server.cors {
        app = app.layer(CorsLayer::permissive());
    }

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind.parse().expect("invalid bind address");
    tracing::info!("DIRGE hub listening on http://{addr}");
    tracing::info!("  query (REST):  POST http://{addr}/api/query");
    tracing::info!("  query (WS):    ws://{addr}/ws/query");
    tracing::info!("  store:         {}", store_dir.display());

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
