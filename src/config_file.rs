//! Configuration file support
//!
//! Loads server configuration from TOML files. Every section is optional;
//! missing values fall back to [`ServerConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{LoggingConfig, ServerConfig, StoreConfig, TranscoderConfig};
use crate::error::{LiveError, Result};

/// Configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: Option<ServerSettings>,
    /// Transcoder settings
    pub transcoder: Option<TranscoderSettings>,
    /// Store settings
    pub store: Option<StoreSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// Limits settings
    pub limits: Option<LimitsSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscoderSettings {
    pub executable: Option<String>,
    pub leading_args: Option<Vec<String>>,
    pub output_root: Option<PathBuf>,
    pub video_codec: Option<String>,
    pub preset: Option<String>,
    pub segment_duration_secs: Option<u32>,
    pub segment_list_size: Option<u32>,
    pub grace_period_secs: Option<u64>,
    pub kill_timeout_secs: Option<u64>,
    pub stderr_tail_lines: Option<usize>,
    pub allowed_schemes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory holding the JSON collections
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Maximum streams that are not yet stopped or failed
    pub max_concurrent_streams: Option<usize>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| LiveError::Config(e.to_string()))
    }

    /// Convert to ServerConfig, filling gaps with defaults
    pub fn into_server_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let server = self.server.unwrap_or_default();
        let t = self.transcoder.unwrap_or_default();
        let td = defaults.transcoder;

        ServerConfig {
            host: server.host.unwrap_or(defaults.host),
            port: server.port.unwrap_or(defaults.port),
            cors_enabled: server.cors_enabled.unwrap_or(defaults.cors_enabled),
            transcoder: TranscoderConfig {
                executable: t.executable.unwrap_or(td.executable),
                leading_args: t.leading_args.unwrap_or(td.leading_args),
                output_root: t.output_root.unwrap_or(td.output_root),
                video_codec: t.video_codec.unwrap_or(td.video_codec),
                preset: t.preset.unwrap_or(td.preset),
                segment_duration_secs: t.segment_duration_secs.unwrap_or(td.segment_duration_secs),
                segment_list_size: t.segment_list_size.unwrap_or(td.segment_list_size),
                grace_period_secs: t.grace_period_secs.unwrap_or(td.grace_period_secs),
                kill_timeout_secs: t.kill_timeout_secs.unwrap_or(td.kill_timeout_secs),
                stderr_tail_lines: t.stderr_tail_lines.unwrap_or(td.stderr_tail_lines),
                allowed_schemes: t.allowed_schemes.unwrap_or(td.allowed_schemes),
            },
            store: StoreConfig {
                path: self.store.and_then(|s| s.path),
            },
            logging: self
                .logging
                .map(|l| LoggingConfig {
                    json: l.format.as_deref() == Some("json"),
                    level: l.level,
                })
                .unwrap_or(defaults.logging),
            max_concurrent_streams: self
                .limits
                .map(|l| l.max_concurrent_streams)
                .unwrap_or(defaults.max_concurrent_streams),
        }
    }
}
