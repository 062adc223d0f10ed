// src/recording/supervisor.rs
//! Session lifecycle supervision
//!
//! Every tap session runs as one spawned task. The supervisor drives it
//! through `NotStarted → Running → CompletedOk | CompletedError`, isolates
//! panics at the task boundary, releases the sink and the conduit exactly
//! once and emits a single [`CompletionRecord`].

use crate::recording::tee::{CopyEnd, CopyTask, SinkFault};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument};
use ulid::Ulid;

/// Lifecycle of a tap session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    CompletedOk,
    CompletedError,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::CompletedOk | SessionState::CompletedError)
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The source reached a clean end-of-stream
    SourceExhausted,
    /// The source failed; the same error was handed to the consumer
    SourceFault(String),
    /// The consumer stopped reading
    ConsumerGone,
    /// The copy logic panicked
    InternalFault(String),
}

impl SessionOutcome {
    pub fn terminal_state(&self) -> SessionState {
        match self {
            SessionOutcome::SourceExhausted => SessionState::CompletedOk,
            _ => SessionState::CompletedError,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::SourceExhausted => f.write_str("completed"),
            SessionOutcome::SourceFault(e) => write!(f, "source failed: {}", e),
            SessionOutcome::ConsumerGone => f.write_str("consumer disconnected"),
            SessionOutcome::InternalFault(e) => write!(f, "internal fault: {}", e),
        }
    }
}

/// Summary emitted once per session
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub flow_id: Ulid,
    pub method: String,
    pub url: String,
    pub destination: String,

    /// Bytes accepted by the sink
    pub bytes_persisted: u64,

    /// `\n` bytes among those persisted
    pub lines_persisted: u64,

    /// Bytes handed to the consumer
    pub bytes_delivered: u64,

    pub outcome: SessionOutcome,

    /// Set when persistence stopped early; the capture is then incomplete
    pub sink_error: Option<SinkFault>,

    pub elapsed: Duration,
}

impl CompletionRecord {
    /// The capture holds every byte that was delivered
    pub fn is_capture_complete(&self) -> bool {
        self.sink_error.is_none() && self.bytes_persisted == self.bytes_delivered
    }
}

/// Receives the completion record of every session
pub trait CompletionObserver: Send + Sync {
    fn on_complete(&self, record: &CompletionRecord);
}

/// Observer that discards records
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CompletionObserver for NoopObserver {
    fn on_complete(&self, _record: &CompletionRecord) {}
}

/// Handle on a running session
#[derive(Debug)]
pub struct SessionHandle {
    flow_id: Ulid,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<CompletionRecord>,
}

impl SessionHandle {
    pub fn flow_id(&self) -> Ulid {
        self.flow_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A receiver following state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait for the session to finish and return its record
    pub async fn wait(self) -> CompletionRecord {
        let flow_id = self.flow_id;
        match self.task.await {
            Ok(record) => record,
            // runtime shutdown, or a panic outside the guarded copy
            Err(err) => CompletionRecord {
                flow_id,
                method: String::new(),
                url: String::new(),
                destination: String::new(),
                bytes_persisted: 0,
                lines_persisted: 0,
                bytes_delivered: 0,
                outcome: SessionOutcome::InternalFault(err.to_string()),
                sink_error: None,
                elapsed: Duration::ZERO,
            },
        }
    }
}

/// Spawn `task` under supervision
pub(crate) fn supervise<R, W>(
    mut task: CopyTask<R, W>,
    observer: Arc<dyn CompletionObserver>,
) -> SessionHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (state_tx, state_rx) = watch::channel(SessionState::NotStarted);
    let flow_id = task.info.flow_id;
    let span = tracing::info_span!("tap_session", %flow_id, destination = %task.info.destination);

    let handle = tokio::spawn(
        async move {
            let started = Instant::now();
            state_tx.send_replace(SessionState::Running);
            debug!("Tap session running");

            let (outcome, terminal) = match AssertUnwindSafe(task.run()).catch_unwind().await {
                Ok(CopyEnd::SourceExhausted) => (SessionOutcome::SourceExhausted, None),
                Ok(CopyEnd::ConsumerGone) => (SessionOutcome::ConsumerGone, None),
                Ok(CopyEnd::SourceFault(err)) => {
                    let message = err.to_string();
                    (SessionOutcome::SourceFault(message), Some(err))
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Tap session panicked: {}", message);
                    let err = io::Error::new(
                        io::ErrorKind::Other,
                        format!("stream tap task panicked: {}", message),
                    );
                    (SessionOutcome::InternalFault(message), Some(err))
                }
            };

            let teardown = task.teardown(terminal).await;

            let record = CompletionRecord {
                flow_id: task.info.flow_id,
                method: task.info.method.clone(),
                url: task.info.url.clone(),
                destination: task.info.destination.clone(),
                bytes_persisted: teardown.tally.bytes,
                lines_persisted: teardown.tally.lines,
                bytes_delivered: teardown.delivered,
                outcome,
                sink_error: teardown.sink_fault,
                elapsed: started.elapsed(),
            };

            state_tx.send_replace(record.outcome.terminal_state());

            let notified =
                std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_complete(&record)));
            if let Err(panic) = notified {
                error!("Completion observer panicked: {}", panic_message(panic.as_ref()));
            }

            record
        }
        .instrument(span),
    );

    SessionHandle {
        flow_id,
        state: state_rx,
        task: handle,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
