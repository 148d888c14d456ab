use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the live server
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Invalid source URI: {0}")]
    InvalidSource(String),

    #[error("Invalid overlay geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid overlay: {0}")]
    InvalidOverlay(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Overlay not found: {0}")]
    OverlayNotFound(String),

    #[error("Too many concurrent streams (limit {0})")]
    TooManyStreams(usize),

    #[error("Previous transcoder of stream {0} has not exited yet")]
    ProcessNotReaped(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure to launch a transcoder process
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("transcoder executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("cannot create output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to spawn transcoder: {0}")]
    Io(#[from] std::io::Error),
}

/// Document store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a stream ended up in the `Failed` state.
///
/// The `Display` text is what gets recorded as the failure reason.
#[derive(Error, Debug)]
pub enum ProcessFailure {
    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    #[error("transcoder exited unexpectedly ({status}){}", format_tail(.stderr_tail))]
    Crash {
        status: String,
        stderr_tail: Vec<String>,
    },

    #[error("kill-timeout")]
    KillTimeout,

    #[error("interrupted by service restart")]
    Interrupted,
}

fn format_tail(tail: &[String]) -> String {
    match tail.last() {
        Some(line) => format!(": {}", line),
        None => String::new(),
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, LiveError>;
