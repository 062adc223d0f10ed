// src/recording/conduit.rs
//! Bounded, back-pressured handoff between the copy task and the consumer
//!
//! The writer suspends while `depth` chunks are waiting; the reader suspends
//! while none are. Closing the writer delivers either a clean end-of-stream
//! or a terminal error, which the reader reports exactly once.

use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// The consumer dropped its end of the conduit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerGone;

/// Create a conduit holding at most `depth` chunks in flight
pub fn conduit(depth: usize) -> (ConduitWriter, ConduitReader) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (
        ConduitWriter { tx },
        ConduitReader {
            rx,
            pending: Bytes::new(),
            finished: false,
        },
    )
}

/// Producer end, owned by the copy task
#[derive(Debug)]
pub struct ConduitWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl ConduitWriter {
    /// Hand a chunk to the consumer, waiting for room
    pub async fn send(&self, chunk: Bytes) -> Result<(), ConsumerGone> {
        self.tx.send(Ok(chunk)).await.map_err(|_| ConsumerGone)
    }

    /// Resolves once the consumer has dropped its end
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the conduit, with `terminal` as the final read result if set.
    ///
    /// Pending chunks are still delivered before the terminal condition.
    pub async fn close(self, terminal: Option<io::Error>) {
        if let Some(err) = terminal {
            // a gone consumer has nobody left to tell
            let _ = self.tx.send(Err(err)).await;
        }
    }
}

/// Consumer end, installed as the response body source
#[derive(Debug)]
pub struct ConduitReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    pending: Bytes,
    finished: bool,
}

impl AsyncRead for ConduitReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                buf.put_slice(&self.pending[..n]);
                self.pending.advance(n);
                return Poll::Ready(Ok(()));
            }

            if self.finished {
                return Poll::Ready(Ok(()));
            }

            match ready!(self.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(err)) => {
                    self.finished = true;
                    self.rx.close();
                    return Poll::Ready(Err(err));
                }
                None => {
                    self.finished = true;
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}
