// src/utils/config.rs
//! Layered configuration
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML file
//! (`stream-tap.toml` or the path in `STREAM_TAP_CONFIG`), then environment
//! variables such as `STREAM_TAP__STORAGE__OUTPUT_DIR`.

use crate::recording::tee::TeeOptions;
use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file stem, resolved relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "stream-tap";

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "STREAM_TAP_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub proxy: ProxyConfig,
    pub storage: StorageConfig,
    pub tee: TeeConfig,
    pub observability: ObservabilityConfig,
}

/// Proxy listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address intercepted traffic is accepted on
    pub listen_addr: SocketAddr,

    /// Log request and response headers at debug level
    pub log_headers: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9080)),
            log_headers: false,
        }
    }
}

/// Where captured streams land
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory, created on demand
    pub output_dir: PathBuf,

    /// Upper bound on the sanitized path part of a file name (bytes)
    pub max_name_len: usize,

    /// File extension for captured streams
    pub extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./stream_data"),
            max_name_len: 50,
            extension: "txt".to_string(),
        }
    }
}

/// Copy loop tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TeeConfig {
    /// Read size per source chunk (bytes)
    pub chunk_size: usize,

    /// Chunks that may sit in the conduit before the copy task suspends
    pub conduit_depth: usize,

    /// Abort a stalled source read (or give up on a stalled sink write)
    /// after this many milliseconds. Unset waits indefinitely.
    pub stall_timeout_ms: Option<u64>,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32 * 1024,
            conduit_depth: 1,
            stall_timeout_ms: None,
        }
    }
}

impl TeeConfig {
    pub fn options(&self) -> TeeOptions {
        TeeOptions {
            chunk_size: self.chunk_size.max(1),
            conduit_depth: self.conduit_depth.max(1),
            stall_timeout: self.stall_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging and metrics
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,

    pub log_format: LogFormat,

    /// Prometheus scrape endpoint; metrics stay in-process when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_addr: None,
        }
    }
}

impl TapConfig {
    /// Load configuration from the default file location and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(path)
    }

    /// Load configuration from an explicit file (which may be absent) and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();

        let config = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("STREAM_TAP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
