// src/interception/mod.rs
//! Response interception layer
//!
//! - **Classifier**: decides whether a response is a live stream
//! - **Flow**: the request/response exchange handed to the hooks
//! - **Stream Interceptor**: header and body hooks that install the tap
//! - **HTTP Interceptor**: plain HTTP forward proxy calling the hooks
//!
//! # Architecture
//!
//! ```text
//! Client ──► HTTP Interceptor ──► Upstream
//!                  │
//!                  ├─ on_response_headers()      classify, flag for streaming
//!                  └─ stream_response_modifier() tee body to capture file
//! ```

pub mod classifier;
pub mod flow;
pub mod http_interceptor;
pub mod stream_interceptor;

// Re-export commonly used types
pub use classifier::{classify, is_streaming, StreamKind};
pub use flow::{Flow, FlowRequest, FlowResponse};
pub use http_interceptor::{HttpInterceptor, ProxyBody};
pub use stream_interceptor::{BodyReader, StreamInterceptor};
