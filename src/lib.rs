// src/lib.rs
//! Stream Tap
//!
//! Captures streaming HTTP responses (Server-Sent Events, streaming JSON,
//! NDJSON) seen by a proxy: every byte is written to a capture file while
//! the same bytes flow on to the client, unbuffered.
//!
//! # Architecture
//!
//! The crate is structured into a few modules:
//!
//! - **interception**: stream classification, proxy hooks, HTTP forward proxy
//! - **recording**: capture files, the tee copy loop, session supervision
//! - **observability**: tracing subscriber, metrics, completion logging
//! - **utils**: configuration and errors

pub mod interception;
pub mod observability;
pub mod recording;
pub mod utils;

// Re-export commonly used types
pub use interception::{
    classify, is_streaming, Flow, HttpInterceptor, StreamInterceptor, StreamKind,
};
pub use recording::{
    tee, CompletionObserver, CompletionRecord, SessionHandle, SinkAllocator, TeeOptions,
};
pub use utils::config::TapConfig;
pub use utils::errors::{Result, TapError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
