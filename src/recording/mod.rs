// src/recording/mod.rs
//! Stream capture
//!
//! This module duplicates live response bodies to disk:
//!
//! - **Sink**: capture file naming and allocation
//! - **Counting**: byte/line accounting on the sink side
//! - **Conduit**: bounded handoff to the live consumer
//! - **Tee**: the copy loop forking one source into sink and conduit
//! - **Supervisor**: session lifecycle, panic isolation, completion records
//!
//! # Architecture
//!
//! ```text
//! body source ──► copy task ──► capture file (best effort)
//!                     │
//!                     └──► conduit (depth 1) ──► client
//! ```
//!
//! The client path is never slowed by the capture: a failing sink is dropped
//! and the stream continues, a failing source or a departed client ends the
//! session.

pub mod conduit;
pub mod counting;
pub mod sink;
pub mod supervisor;
pub mod tee;

// Re-export commonly used types
pub use conduit::{conduit, ConduitReader, ConduitWriter, ConsumerGone};
pub use counting::{CountingWriter, Tally};
pub use sink::{destination_id, sanitize_path, Destination, SinkAllocator};
pub use supervisor::{
    CompletionObserver, CompletionRecord, NoopObserver, SessionHandle, SessionOutcome,
    SessionState,
};
pub use tee::{tee, SessionInfo, SinkFault, TeeOptions};

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for the capture tests

    use super::{CompletionObserver, CompletionRecord, SessionInfo};
    use bytes::Bytes;
    use std::io;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio_util::io::StreamReader;
    use ulid::Ulid;

    #[derive(Debug, Default)]
    struct MemoryState {
        data: Vec<u8>,
        limit: Option<usize>,
        flush_fails: bool,
        shutdowns: usize,
    }

    /// In-memory sink that can be told to fail after a number of bytes
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MemorySink {
        state: Arc<Mutex<MemoryState>>,
    }

    impl MemorySink {
        pub(crate) fn failing_after(limit: usize) -> Self {
            let sink = Self::default();
            sink.state.lock().unwrap().limit = Some(limit);
            sink
        }

        /// Accepts writes but rejects every flush
        pub(crate) fn failing_flush() -> Self {
            let sink = Self::default();
            sink.state.lock().unwrap().flush_fails = true;
            sink
        }

        pub(crate) fn contents(&self) -> Vec<u8> {
            self.state.lock().unwrap().data.clone()
        }

        pub(crate) fn shutdowns(&self) -> usize {
            self.state.lock().unwrap().shutdowns
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.shutdowns() > 0
        }
    }

    impl AsyncWrite for MemorySink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let mut state = self.state.lock().unwrap();
            let room = match state.limit {
                Some(limit) if state.data.len() >= limit => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")));
                }
                Some(limit) => limit - state.data.len(),
                None => usize::MAX,
            };
            let n = buf.len().min(room);
            state.data.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            if self.state.lock().unwrap().flush_fails {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "flush rejected")));
            }
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.state.lock().unwrap().shutdowns += 1;
            Poll::Ready(Ok(()))
        }
    }

    /// Sink on which no write, flush or shutdown ever completes
    #[derive(Debug, Clone, Default)]
    pub(crate) struct StalledSink {
        handles: Arc<()>,
    }

    impl StalledSink {
        /// No other clone of this sink is still held
        pub(crate) fn is_released(&self) -> bool {
            Arc::strong_count(&self.handles) == 1
        }
    }

    impl AsyncWrite for StalledSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    /// Source yielding the given chunks, or an error of the given kind
    pub(crate) fn chunked_source(
        chunks: Vec<Result<&[u8], io::ErrorKind>>,
    ) -> impl AsyncRead + Unpin + Send + 'static {
        let items: Vec<io::Result<Bytes>> = chunks
            .into_iter()
            .map(|chunk| {
                chunk
                    .map(Bytes::copy_from_slice)
                    .map_err(|kind| io::Error::new(kind, "injected source failure"))
            })
            .collect();
        StreamReader::new(futures::stream::iter(items))
    }

    /// Source that yields `prefix` and then panics
    pub(crate) struct PanickingSource {
        prefix: &'static [u8],
        sent: bool,
    }

    impl PanickingSource {
        pub(crate) fn after(prefix: &'static [u8]) -> Self {
            Self { prefix, sent: false }
        }
    }

    impl AsyncRead for PanickingSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                panic!("source exploded");
            }
            self.sent = true;
            buf.put_slice(self.prefix);
            Poll::Ready(Ok(()))
        }
    }

    pub(crate) type Records = Arc<Mutex<Vec<CompletionRecord>>>;

    struct CollectingObserver(Records);

    impl CompletionObserver for CollectingObserver {
        fn on_complete(&self, record: &CompletionRecord) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    pub(crate) fn collecting_observer() -> (Arc<dyn CompletionObserver>, Records) {
        let records = Records::default();
        (Arc::new(CollectingObserver(Arc::clone(&records))), records)
    }

    pub(crate) fn session_info() -> SessionInfo {
        SessionInfo {
            flow_id: Ulid::from_parts(1_700_000_000_000, 42),
            method: "POST".to_string(),
            url: "http://api.example.com/v1/stream".to_string(),
            destination: "20240101_000000__v1_stream".to_string(),
        }
    }
}
