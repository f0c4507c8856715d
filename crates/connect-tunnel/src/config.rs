//! Tunnel configuration.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::line::MAX_LINE;
use crate::request::{HttpVersion, TunnelRequest};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unsupported HTTP version: {0}")]
    UnsupportedHttpVersion(String),

    #[error("Invalid target, expected 'host:port': {0}")]
    InvalidTarget(String),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// `HTTP/1.0` or `HTTP/1.1`; anything else falls back to `HTTP/1.0`.
    pub http_version: String,

    // Safety bounds
    pub max_line_len: usize,
    pub max_recovery_lines: usize,

    // Per-read poll interval (milliseconds)
    pub poll_timeout_ms: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            http_version: HttpVersion::default().as_str().to_string(),
            max_line_len: MAX_LINE,
            max_recovery_lines: 64,
            poll_timeout_ms: 100,
        }
    }
}

impl TunnelConfig {
    /// Load from environment variables or use defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TUNNEL_HTTP_VERSION") {
            config.http_version = val;
        }

        if let Ok(val) = std::env::var("TUNNEL_MAX_LINE_LEN") {
            if let Ok(n) = val.parse() {
                config.max_line_len = n;
            }
        }

        if let Ok(val) = std::env::var("TUNNEL_POLL_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.poll_timeout_ms = n;
            }
        }

        if let Ok(val) = std::env::var("TUNNEL_MAX_RECOVERY_LINES") {
            if let Ok(n) = val.parse() {
                config.max_recovery_lines = n;
            }
        }

        config
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "tunnel configuration loaded");
        Ok(config)
    }

    /// Resolved protocol version for CONNECT request lines.
    pub fn http_version(&self) -> HttpVersion {
        match self.http_version.parse() {
            Ok(version) => version,
            Err(_) => {
                info!(
                    requested = %self.http_version,
                    default = HttpVersion::default().as_str(),
                    "unsupported http-version, using the default"
                );
                HttpVersion::default()
            }
        }
    }

    /// A request for `host:port` using the configured protocol version.
    pub fn request(&self, host: impl Into<String>, port: u16) -> TunnelRequest {
        TunnelRequest::new(host, port).with_version(self.http_version())
    }

    pub fn poll_timeout(&self) -> Duration {
        // A zero read timeout is rejected by sockets.
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}
