// src/interception/stream_interceptor.rs
//! Streaming response interceptor
//!
//! Plugs into the proxy at two points per response:
//!
//! 1. [`StreamInterceptor::on_response_headers`] once headers are known:
//!    flags streaming flows for unbuffered delivery.
//! 2. [`StreamInterceptor::stream_response_modifier`] with the raw body:
//!    swaps the body for a tee'd reader that also writes a capture file.

use crate::interception::classifier::{classify, content_type};
use crate::interception::flow::Flow;
use crate::recording::sink::SinkAllocator;
use crate::recording::supervisor::{CompletionObserver, SessionState};
use crate::recording::tee::{tee, SessionInfo, TeeOptions};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

/// Body source handed between the proxy and the interceptor
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Interceptor capturing streaming responses to disk
pub struct StreamInterceptor {
    allocator: SinkAllocator,
    tee_options: TeeOptions,
    observer: Arc<dyn CompletionObserver>,
    sessions: DashMap<Ulid, watch::Receiver<SessionState>>,
}

impl StreamInterceptor {
    pub fn new(
        allocator: SinkAllocator,
        tee_options: TeeOptions,
        observer: Arc<dyn CompletionObserver>,
    ) -> Self {
        Self {
            allocator,
            tee_options,
            observer,
            sessions: DashMap::new(),
        }
    }

    pub fn allocator(&self) -> &SinkAllocator {
        &self.allocator
    }

    /// Header hook: switch streaming responses to unbuffered delivery
    pub fn on_response_headers(&self, flow: &mut Flow) {
        let Some(kind) = classify(&flow.response.headers) else {
            return;
        };

        flow.stream = true;
        flow.response.body = None;

        info!(
            flow_id = %flow.id,
            kind = %kind,
            "Streaming response detected: {} {} - Content-Type: {}",
            flow.request.method,
            flow.url(),
            content_type(&flow.response.headers).unwrap_or_default()
        );
    }

    /// Request bodies pass through untouched
    pub fn request_modifier(&self, _flow: &Flow, reader: BodyReader) -> BodyReader {
        reader
    }

    /// Body hook: return the reader the proxy should deliver to the client.
    ///
    /// Anything other than a fresh streaming flow with a writable capture
    /// destination gets the original reader back unchanged.
    pub async fn stream_response_modifier(
        &self,
        flow: &mut Flow,
        reader: Option<BodyReader>,
    ) -> BodyReader {
        let Some(reader) = reader else {
            warn!(
                flow_id = %flow.id,
                "No body reader for streaming response, substituting an empty body"
            );
            return Box::new(tokio::io::empty());
        };

        if classify(&flow.response.headers).is_none() {
            return reader;
        }

        if flow.is_intercepted() || self.sessions.contains_key(&flow.id) {
            debug!(flow_id = %flow.id, "Flow already intercepted, leaving body untouched");
            return reader;
        }

        let (file, destination) = match self.allocator.allocate(flow).await {
            Ok(opened) => opened,
            Err(e) => {
                error!(
                    flow_id = %flow.id,
                    "Cannot create capture file, forwarding stream uncaptured: {}",
                    e
                );
                return reader;
            }
        };

        info!(
            flow_id = %flow.id,
            "Intercepting {} {} - saving stream to {:?}",
            flow.request.method,
            flow.url(),
            destination.path
        );

        let info = SessionInfo {
            flow_id: flow.id,
            method: flow.request.method.to_string(),
            url: flow.url(),
            destination: destination.id,
        };

        let (tapped, handle) = tee(
            reader,
            file,
            info,
            &self.tee_options,
            Arc::clone(&self.observer),
        );

        flow.mark_intercepted();
        self.sessions.retain(|_, state| !state.borrow().is_terminal());
        self.sessions.insert(flow.id, handle.subscribe());

        Box::new(tapped)
    }

    /// Sessions that have not reached a terminal state
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().borrow().is_terminal())
            .count()
    }

    /// Lifecycle state of the session attached to `flow_id`, if still tracked
    pub fn session_state(&self, flow_id: &Ulid) -> Option<SessionState> {
        self.sessions.get(flow_id).map(|entry| *entry.value().borrow())
    }
}
