//! HLS Live Server
//!
//! Supervises external transcoder processes that turn live network sources
//! (RTSP cameras, RTMP feeds, ...) into HLS playlists and segments, serves
//! the output over HTTP and keeps overlay metadata for every stream.

mod config;
mod config_file;
mod error;
mod http;
mod metrics;
mod overlay;
mod process;
mod state;
mod store;
mod supervisor;


use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LoggingConfig, ServerConfig};
use crate::error::{LiveError, Result};
use crate::http::create_router;
use crate::state::AppState;
use crate::store::{DocumentStore, JsonFileStore, MemoryStore};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "hls-live-server";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let (config, load_error) = load_config(&config_path);

    // Initialize logging
    init_logging(&config.logging);
    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            config_path,
            e
        );
    }
    tracing::info!("Configuration loaded: {:?}", config);

    // Open the document store
    let store: Arc<dyn DocumentStore> = match &config.store.path {
        Some(path) => {
            let store = JsonFileStore::open(path)?;
            tracing::info!("Persisting records under {:?}", store.dir());
            Arc::new(store)
        }
        None => Arc::new(MemoryStore::new()),
    };

    // Create application state
    std::fs::create_dir_all(&config.transcoder.output_root)?;
    let state = Arc::new(AppState::new(config.clone(), store)?);
    tokio::spawn(supervisor::log_events(state.supervisor.subscribe()));

    // Build router
    let app = create_router(state.clone());

    // Start server
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| LiveError::Config(format!("invalid listen address: {}", e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, stopping transcoders");
    let report = state.supervisor.shutdown_all().await;
    if !report.failed.is_empty() {
        tracing::warn!("Streams that did not stop cleanly: {:?}", report.failed);
    }

    Ok(())
}

/// Read the TOML config at `path`. A missing file means defaults; an
/// unreadable one also means defaults, plus the error to report.
fn load_config(path: &str) -> (ServerConfig, Option<LiveError>) {
    if !std::path::Path::new(path).exists() {
        return (ServerConfig::default(), None);
    }
    match crate::config_file::ConfigFile::from_file(path) {
        Ok(cf) => (cf.into_server_config(), None),
        Err(e) => (ServerConfig::default(), Some(e)),
    }
}

/// Initialize logging with tracing
fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "hls_live_server={},tower_http={}",
            config.level, config.level
        )
        .into()
    });

    let (json, plain) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
        }
    }

    tracing::info!("Shutdown signal received");
}
