//! drillsync sync server
//!
//! Accepts chunked pushes from field devices, hands out per-table
//! incremental pulls and keeps a change log that clients follow.
//!
//! # Configuration
//!
//! Environment variables:
//! - `DRILLSYNC_SERVER_PORT`: Port to listen on (default: 8080)
//! - `DRILLSYNC_SERVER_DB`: SQLite database (default: ~/.local/share/drillsync-server/server.db)
//! - `DRILLSYNC_SERVER_CONFIG`: Path to config file (default: ~/.config/drillsync-server/config.yaml)
//! - `DRILLSYNC_RETENTION_HOURS`: Change-log retention (default: 168)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "geo1"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `POST /sync`: Push a chunk of changes
//! - `POST /sync/rv`: Pull rows of one table above a revision
//! - `GET /records/{table}/{pk}`: Fetch one row
//! - `GET /status/{client_id}`: What the server knows about a client

use chrono::Utc;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drillsync::server::{router, ApiKeyStore, AppState, ServerStore};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// SQLite database holding rows and the change log
    db_path: PathBuf,
    /// Path to config file
    config_path: PathBuf,
    /// How long change-log entries are kept
    retention_hours: i64,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("DRILLSYNC_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let db_path = std::env::var("DRILLSYNC_SERVER_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("drillsync-server")
                    .join("server.db")
            });

        let config_path = std::env::var("DRILLSYNC_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("drillsync-server")
                    .join("config.yaml")
            });

        let retention_hours = std::env::var("DRILLSYNC_RETENTION_HOURS")
            .ok()
            .and_then(|h| h.parse().ok())
            .filter(|h: &i64| *h > 0)
            .unwrap_or(168);

        Self {
            port,
            db_path,
            config_path,
            retention_hours,
        }
    }
}

/// Prunes the change log once an hour. Clients behind the pruned range get
/// a resync response on their next push.
fn spawn_pruning(store: ServerStore) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - chrono::Duration::hours(store.retention_hours());
            if let Err(e) = store.prune_before(cutoff).await {
                tracing::error!("Failed to prune change log: {}", e);
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drillsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    tracing::info!("Database: {}", config.db_path.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let store = match ServerStore::open(&config.db_path, config.retention_hours).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open server database: {}", e);
            std::process::exit(1);
        }
    };

    // Load API keys
    let api_keys = Arc::new(ApiKeyStore::load(&config.config_path));

    spawn_pruning(store.clone());

    let app = router(AppState { store, api_keys });

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
