//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// External transcoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Transcoder executable (looked up on PATH when not absolute)
    pub executable: String,

    /// Arguments inserted before the generated argument template
    pub leading_args: Vec<String>,

    /// Parent directory of every per-stream segment directory
    pub output_root: PathBuf,

    /// Video encoder passed as `-c:v`
    pub video_codec: String,

    /// Encoder preset passed as `-preset`
    pub preset: String,

    /// Target segment duration in seconds
    pub segment_duration_secs: u32,

    /// Number of segments kept in the sliding playlist window
    pub segment_list_size: u32,

    /// Time allowed for a graceful stop before the process is killed
    pub grace_period_secs: u64,

    /// Time allowed for a killed process to be reaped
    pub kill_timeout_secs: u64,

    /// Number of trailing stderr lines kept for failure reports
    pub stderr_tail_lines: usize,

    /// URI schemes accepted as stream sources. `file` is left out of the
    /// default so clients cannot publish local files.
    pub allowed_schemes: Vec<String>,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            executable: "ffmpeg".to_string(),
            leading_args: Vec::new(),
            output_root: std::env::temp_dir().join("hls-live"),
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            segment_duration_secs: 2,
            segment_list_size: 6,
            grace_period_secs: 5,
            kill_timeout_secs: 5,
            stderr_tail_lines: 20,
            allowed_schemes: ["rtsp", "rtsps", "rtmp", "rtmps", "srt", "http", "https", "udp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TranscoderConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

/// Document store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for JSON collections; in-memory only when unset
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON records instead of human readable lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Transcoder configuration
    pub transcoder: TranscoderConfig,

    /// Document store configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Maximum number of streams that are not yet stopped or failed
    pub max_concurrent_streams: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_enabled: true,
            transcoder: TranscoderConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            max_concurrent_streams: Some(32),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
