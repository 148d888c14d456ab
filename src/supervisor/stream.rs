//! Stream records and their lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LiveError, Result};

// Compiles the pattern once per call site.
macro_rules! regex {
    ($re:literal $(,)?) => {{
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| regex::Regex::new($re).unwrap())
    }};
}

/// Lifecycle state of a stream.
///
/// Within one run the state only moves forward:
/// `Starting -> Running -> Stopping -> Stopped`, with `Failed` reachable from
/// every non-terminal state. Leaving `Stopped`/`Failed` requires an explicit
/// restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed { reason: String },
}

impl StreamState {
    pub fn failed(reason: impl ToString) -> Self {
        StreamState::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Stopped | StreamState::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamState::Starting => "starting",
            StreamState::Running => "running",
            StreamState::Stopping => "stopping",
            StreamState::Stopped => "stopped",
            StreamState::Failed { .. } => "failed",
        }
    }

    /// Forward transitions allowed within a single run
    pub fn can_transition_to(&self, next: &StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Starting, Failed { .. })
                | (Running, Failed { .. })
                | (Stopping, Failed { .. })
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Failed { reason } => write!(f, "failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// A supervised live stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub source_uri: String,
    pub display_name: String,
    pub state: StreamState,
    /// Where the playlist is served; set once the stream is running
    pub output_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stream {
    pub fn new(id: String, source_uri: String, display_name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_uri,
            display_name,
            state: StreamState::Starting,
            output_location: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Check that `uri` looks like `scheme://rest` with an accepted scheme.
///
/// An empty `allowed_schemes` list accepts any scheme.
pub fn validate_source_uri(uri: &str, allowed_schemes: &[String]) -> Result<()> {
    if uri.trim().is_empty() {
        return Err(LiveError::InvalidSource("source URI is empty".to_string()));
    }

    let caps = regex!(r"^([A-Za-z][A-Za-z0-9+.\-]*)://(\S+)$")
        .captures(uri)
        .ok_or_else(|| LiveError::InvalidSource(format!("malformed source URI: {}", uri)))?;

    let scheme = caps[1].to_ascii_lowercase();
    if !allowed_schemes.is_empty() && !allowed_schemes.iter().any(|s| s.eq_ignore_ascii_case(&scheme)) {
        return Err(LiveError::InvalidSource(format!(
            "unsupported source scheme: {}",
            scheme
        )));
    }

    Ok(())
}
