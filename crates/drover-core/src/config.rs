//! Client configuration.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $DROVER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/drover/config.toml
//!   3. ~/.config/drover/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    pub endpoints: Vec<String>,
    pub auth: AuthConfig,
    pub http: HttpConfig,
    pub vst: VstConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// "basic", "jwt", or "bearer". Empty = unauthenticated.
    pub method: String,
    pub username: String,
    pub password: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// "json" or "velocypack".
    pub content_type: String,
    /// Prefer HTTP/2 over HTTP/1.1.
    pub http2: bool,
    /// Request compression: "", "gzip", or "deflate".
    pub compression: String,
    /// flate2 compression level, 0-9.
    pub compression_level: u32,
    /// Send x-arango-queue-time-seconds derived from the deadline.
    pub queue_time_limit: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            content_type: "json".into(),
            http2: false,
            compression: String::new(),
            compression_level: 6,
            queue_time_limit: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VstConfig {
    /// "1.0" or "1.1".
    pub version: String,
    /// Connections kept per host.
    pub connection_limit: usize,
    /// Seconds before an unused connection is reaped.
    pub idle_timeout_secs: u64,
    /// Upper bound for one chunk on the wire, header included.
    pub max_chunk_size: u32,
}

impl Default for VstConfig {
    fn default() -> Self {
        Self {
            version: "1.1".into(),
            connection_limit: 3,
            idle_timeout_secs: 60,
            max_chunk_size: 30_000,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("drover")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl DroverConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            DroverConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("DROVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply DROVER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DROVER_ENDPOINTS") {
            self.endpoints = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("DROVER_AUTH__METHOD") {
            self.auth.method = v;
        }
        if let Ok(v) = std::env::var("DROVER_AUTH__USERNAME") {
            self.auth.username = v;
        }
        if let Ok(v) = std::env::var("DROVER_AUTH__PASSWORD") {
            self.auth.password = v;
        }
        if let Ok(v) = std::env::var("DROVER_AUTH__TOKEN") {
            self.auth.token = v;
        }
        if let Ok(v) = std::env::var("DROVER_HTTP__CONTENT_TYPE") {
            self.http.content_type = v;
        }
        if let Ok(v) = std::env::var("DROVER_HTTP__HTTP2") {
            self.http.http2 = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("DROVER_HTTP__COMPRESSION") {
            self.http.compression = v;
        }
        if let Ok(v) = std::env::var("DROVER_HTTP__COMPRESSION_LEVEL") {
            if let Ok(n) = v.parse() {
                self.http.compression_level = n;
            }
        }
        if let Ok(v) = std::env::var("DROVER_HTTP__QUEUE_TIME_LIMIT") {
            self.http.queue_time_limit = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("DROVER_VST__VERSION") {
            self.vst.version = v;
        }
        if let Ok(v) = std::env::var("DROVER_VST__CONNECTION_LIMIT") {
            if let Ok(n) = v.parse() {
                self.vst.connection_limit = n;
            }
        }
        if let Ok(v) = std::env::var("DROVER_VST__IDLE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.vst.idle_timeout_secs = n;
            }
        }
    }
}
