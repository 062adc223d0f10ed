// src/recording/tee.rs
//! Non-buffering byte fork
//!
//! [`tee`] wraps a body source and returns a reader yielding the same bytes,
//! while a background task copies every chunk into a sink as it passes.
//!
//! ```text
//! source ──read──► copy task ──write──► CountingWriter ──► sink (best effort)
//!                      │
//!                      └──send──► conduit ──read──► returned reader
//! ```
//!
//! Each chunk reaches the sink and then the conduit before the next one is
//! read, so both sides see the same bytes in the same order.

use crate::recording::conduit::{conduit, ConduitReader, ConduitWriter, ConsumerGone};
use crate::recording::counting::{CountingWriter, Tally};
use crate::recording::supervisor::{supervise, CompletionObserver, SessionHandle};
use bytes::BytesMut;
use futures::FutureExt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use ulid::Ulid;

/// Copy loop tuning
#[derive(Debug, Clone)]
pub struct TeeOptions {
    /// Maximum bytes read from the source per chunk
    pub chunk_size: usize,

    /// Chunks allowed in the conduit before the copy task waits
    pub conduit_depth: usize,

    /// Give up on a source read or sink write stalled this long
    pub stall_timeout: Option<Duration>,
}

impl Default for TeeOptions {
    fn default() -> Self {
        Self {
            chunk_size: 32 * 1024,
            conduit_depth: 1,
            stall_timeout: None,
        }
    }
}

/// Identity of the flow a session belongs to
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub flow_id: Ulid,
    pub method: String,
    pub url: String,
    pub destination: String,
}

/// Fork `source` into `sink` and the returned reader.
///
/// Returns immediately; the copy runs on a spawned task supervised by
/// [`supervise`]. Must be called from within a Tokio runtime.
pub fn tee<R, W>(
    source: R,
    sink: W,
    info: SessionInfo,
    options: &TeeOptions,
    observer: Arc<dyn CompletionObserver>,
) -> (ConduitReader, SessionHandle)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (writer, reader) = conduit(options.conduit_depth);
    let task = CopyTask::new(source, sink, writer, info, options);
    let handle = supervise(task, observer);
    (reader, handle)
}

/// Persistence failure mid-stream; the live stream carries on without it
#[derive(Debug, Clone)]
pub struct SinkFault {
    pub after_bytes: u64,
    pub message: String,
}

/// How the copy loop stopped
#[derive(Debug)]
pub(crate) enum CopyEnd {
    SourceExhausted,
    SourceFault(io::Error),
    ConsumerGone,
}

/// What a finished session hands back to the supervisor
#[derive(Debug)]
pub(crate) struct Teardown {
    pub tally: Tally,
    pub delivered: u64,
    pub sink_fault: Option<SinkFault>,
}

/// State of one copy loop: the source, both destinations, counters
pub(crate) struct CopyTask<R, W> {
    source: R,
    sink: Option<CountingWriter<W>>,
    conduit: Option<ConduitWriter>,
    pub(crate) info: SessionInfo,
    chunk_size: usize,
    stall_timeout: Option<Duration>,
    delivered: u64,
    tally: Tally,
    sink_fault: Option<SinkFault>,
}

impl<R, W> CopyTask<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(
        source: R,
        sink: W,
        conduit: ConduitWriter,
        info: SessionInfo,
        options: &TeeOptions,
    ) -> Self {
        Self {
            source,
            sink: Some(CountingWriter::new(sink)),
            conduit: Some(conduit),
            info,
            chunk_size: options.chunk_size.max(1),
            stall_timeout: options.stall_timeout,
            delivered: 0,
            tally: Tally::default(),
            sink_fault: None,
        }
    }

    /// Copy until the source ends, the source fails or the consumer leaves
    pub(crate) async fn run(&mut self) -> CopyEnd {
        let mut buf = BytesMut::with_capacity(self.chunk_size);

        loop {
            buf.reserve(self.chunk_size);

            let read = tokio::select! {
                biased;
                _ = consumer_left(self.conduit.as_ref()) => return CopyEnd::ConsumerGone,
                read = read_chunk(
                    &mut self.source,
                    &mut buf,
                    self.chunk_size,
                    self.stall_timeout,
                ) => read,
            };

            match read {
                Ok(0) => return CopyEnd::SourceExhausted,
                Ok(_) => {}
                Err(err) => return CopyEnd::SourceFault(err),
            }

            let chunk = buf.split().freeze();

            if let Some(sink) = self.sink.as_mut() {
                if let Err(err) = write_chunk(sink, &chunk, self.stall_timeout).await {
                    let after_bytes = sink.tally().bytes;
                    warn!(
                        flow_id = %self.info.flow_id,
                        destination = %self.info.destination,
                        "Capture write failed after {} bytes, stream continues uncaptured: {}",
                        after_bytes,
                        err
                    );
                    self.tally = sink.tally();
                    self.record_sink_fault(err.to_string());
                    self.close_sink().await;
                }
            }

            let len = chunk.len() as u64;
            let sent = match self.conduit.as_ref() {
                Some(conduit) => conduit.send(chunk).await,
                None => Err(ConsumerGone),
            };
            if sent.is_err() {
                return CopyEnd::ConsumerGone;
            }
            self.delivered += len;
        }
    }

    /// Release both destinations. Each is closed at most once, here or earlier.
    pub(crate) async fn teardown(&mut self, terminal: Option<io::Error>) -> Teardown {
        self.close_sink().await;

        if let Some(conduit) = self.conduit.take() {
            conduit.close(terminal).await;
        }

        Teardown {
            tally: self.tally,
            delivered: self.delivered,
            sink_fault: self.sink_fault.clone(),
        }
    }

    async fn close_sink(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };

        self.tally = sink.tally();
        let closing = AssertUnwindSafe(sink.close()).catch_unwind();
        let closed = match self.stall_timeout {
            // a sink stalled on write is likely stalled on shutdown too
            Some(limit) => match tokio::time::timeout(limit, closing).await {
                Ok(closed) => closed,
                Err(_) => {
                    warn!(
                        destination = %self.info.destination,
                        "Capture close stalled for {:?}, abandoning it",
                        limit
                    );
                    self.record_sink_fault(format!("sink close stalled for {:?}", limit));
                    return;
                }
            },
            None => closing.await,
        };

        match closed {
            Ok((tally, Ok(()))) => {
                self.tally = tally;
                debug!(destination = %self.info.destination, "Capture closed");
            }
            Ok((_, Err(err))) => {
                warn!(destination = %self.info.destination, "Failed to close capture: {}", err);
                self.record_sink_fault(err.to_string());
            }
            Err(_) => warn!(destination = %self.info.destination, "Capture close panicked"),
        }
    }

    /// Keep the first persistence failure only
    fn record_sink_fault(&mut self, message: String) {
        if self.sink_fault.is_none() {
            self.sink_fault = Some(SinkFault {
                after_bytes: self.tally.bytes,
                message,
            });
        }
    }
}

async fn consumer_left(conduit: Option<&ConduitWriter>) {
    if let Some(conduit) = conduit {
        conduit.closed().await;
    }
}

async fn read_chunk<R>(
    source: &mut R,
    buf: &mut BytesMut,
    chunk_size: usize,
    stall_timeout: Option<Duration>,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut limited = source.take(chunk_size as u64);
    let read = limited.read_buf(buf);
    match stall_timeout {
        Some(limit) => tokio::time::timeout(limit, read).await.unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("source stalled for {:?}", limit),
            ))
        }),
        None => read.await,
    }
}

/// Write and flush one chunk, so the sink's tally only covers bytes it kept
async fn write_chunk<W>(
    sink: &mut W,
    chunk: &[u8],
    stall_timeout: Option<Duration>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        if let Err(err) = sink.write_all(chunk).await {
            // settle the part of the chunk the sink did accept
            let _ = sink.flush().await;
            return Err(err);
        }
        sink.flush().await
    };

    match stall_timeout {
        Some(limit) => tokio::time::timeout(limit, write).await.unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("sink stalled for {:?}", limit),
            ))
        }),
        None => write.await,
    }
}
