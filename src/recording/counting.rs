// src/recording/counting.rs
//! Byte and line accounting for the sink side of a tap

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Totals observed by a [`CountingWriter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub bytes: u64,
    pub lines: u64,
}

impl Tally {
    fn add(&mut self, written: &[u8]) {
        self.bytes += written.len() as u64;
        self.lines += written.iter().filter(|&&b| b == b'\n').count() as u64;
    }
}

/// Passthrough writer counting the bytes (and `\n` terminators) the inner
/// writer has durably taken. Adds no buffering of its own.
///
/// Accepted bytes only count once a flush or shutdown of the inner writer
/// succeeds; writers like `tokio::fs::File` report write errors late.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    tally: Tally,
    unflushed: Tally,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            tally: Tally::default(),
            unflushed: Tally::default(),
        }
    }

    /// Totals confirmed by the inner writer
    pub fn tally(&self) -> Tally {
        self.tally
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: AsyncWrite + Unpin> CountingWriter<W> {
    /// Flush and shut down the inner writer.
    ///
    /// Consumes the writer so a sink is closed at most once.
    pub async fn close(mut self) -> (Tally, io::Result<()>) {
        let result = self.shutdown().await;
        (self.tally, result)
    }

    fn settle(&mut self, result: &io::Result<()>) {
        let unflushed = std::mem::take(&mut self.unflushed);
        if result.is_ok() {
            self.tally.bytes += unflushed.bytes;
            self.tally.lines += unflushed.lines;
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let n = ready!(Pin::new(&mut self.inner).poll_write(cx, buf))?;
        self.unflushed.add(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = ready!(Pin::new(&mut self.inner).poll_flush(cx));
        self.settle(&result);
        Poll::Ready(result)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = ready!(Pin::new(&mut self.inner).poll_shutdown(cx));
        self.settle(&result);
        Poll::Ready(result)
    }
}
