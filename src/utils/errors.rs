// src/utils/errors.rs
//! Error types for the stream tap
//!
//! Session-level faults (source, sink, consumer, panics) never surface here:
//! they are reported through [`crate::recording::CompletionRecord`]. This
//! type covers setup and allocation failures only.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, TapError>;

/// Stream tap errors
#[derive(Debug, Error)]
pub enum TapError {
    /// The persistence sink could not be opened (non-fatal to delivery)
    #[error("Sink unavailable at {path:?}: {source}")]
    SinkUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Proxy failed: {0}")]
    ProxyFailed(String),

    #[error("Observability setup failed: {0}")]
    Observability(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TapError {
    /// Whether the response can still be delivered untouched after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TapError::SinkUnavailable { .. })
    }
}
