//! Ordered event log shared by every subsystem.
//!
//! Producers hold a cloneable [`EventSender`]; a single consumer thread owns
//! the [`EventWriter`] and writes events in the order they were enqueued.
//! Closing the log drops the only live producer handle, so the consumer drains
//! whatever is still buffered before it reports completion.

mod writer;

use std::error::Error;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

pub use writer::{EventWriter, capture_local_offset, format_event};

pub(crate) const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// Capacity of the shared event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 10;

/// Severity of a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Status reporting.
    Info,
    /// A fault worth an operator's attention.
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => formatter.write_str("info"),
            Self::Error => formatter.write_str("error"),
        }
    }
}

/// Something that happened inside the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Severity.
    pub level: Level,
    /// Human-readable description.
    pub message: String,
    /// Rendered error chain, when the event reports a failure.
    pub error: Option<String>,
    /// Captured stack, written verbatim after the event line.
    pub stack: Option<Vec<u8>>,
}

impl LogEvent {
    /// Builds an informational event.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            message: message.into(),
            error: None,
            stack: None,
        }
    }

    /// Builds an error event carrying the rendered `error` chain.
    pub fn error(message: impl Into<String>, error: &dyn Error) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
            error: Some(render_chain(error)),
            stack: None,
        }
    }

    /// Attaches a captured stack.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<Vec<u8>>) -> Self {
        let stack = stack.into();
        self.stack = (!stack.is_empty()).then_some(stack);
        self
    }
}

fn render_chain(error: &dyn Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Producer side of the event log.
///
/// Every clone feeds the same channel. Once the log is closed, sends are
/// dropped and reported as `false`.
#[derive(Clone)]
pub struct EventSender {
    inner: Arc<Mutex<Option<SyncSender<LogEvent>>>>,
}

impl fmt::Debug for EventSender {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EventSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EventSender {
    /// Enqueues `event`, blocking while the channel is full.
    pub fn send(&self, event: LogEvent) -> bool {
        let sender = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Enqueues an informational event.
    pub fn info(&self, message: impl Into<String>) -> bool {
        self.send(LogEvent::info(message))
    }

    /// Enqueues an error event.
    pub fn error(&self, message: impl Into<String>, error: &dyn Error) -> bool {
        self.send(LogEvent::error(message, error))
    }

    /// Whether the producer side has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Closes the producer side. Returns `false` when already closed.
    pub(crate) fn close(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}

/// Consumer side of the event log before its thread starts.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: Receiver<LogEvent>,
}

/// Creates a bounded event channel.
#[must_use]
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    (
        EventSender {
            inner: Arc::new(Mutex::new(Some(sender))),
        },
        EventReceiver { receiver },
    )
}

/// Errors raised while waiting for the consumer to finish.
#[derive(Debug, Error)]
pub enum DrainError {
    /// The consumer did not finish within the allotted time.
    #[error("event log did not drain within {timeout:?}")]
    Timeout {
        /// Bound that elapsed.
        timeout: Duration,
    },
    /// The consumer thread exited without confirming the drain.
    #[error("event log consumer exited before confirming the drain")]
    ConsumerLost,
}

/// Handle to the running consumer thread.
#[derive(Debug)]
pub struct ConsumerHandle {
    drained: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Blocks until the consumer has written every buffered event, or until
    /// `timeout` elapses. `None` waits for the drain without a bound.
    pub fn wait_drained(mut self, timeout: Option<Duration>) -> Result<(), DrainError> {
        let outcome = match timeout {
            Some(bound) => self.drained.recv_timeout(bound),
            None => self
                .drained
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        match outcome {
            Ok(()) => {
                if let Some(thread) = self.thread.take()
                    && thread.join().is_err()
                {
                    return Err(DrainError::ConsumerLost);
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(DrainError::Timeout {
                timeout: timeout.unwrap_or_default(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DrainError::ConsumerLost),
        }
    }
}

/// Iterates events until every producer is gone, for callers that consume
/// the log themselves.
impl IntoIterator for EventReceiver {
    type Item = LogEvent;
    type IntoIter = mpsc::IntoIter<LogEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.receiver.into_iter()
    }
}

impl EventReceiver {
    /// Starts the consumer thread writing into `writer`.
    pub fn spawn(self, mut writer: EventWriter) -> std::io::Result<ConsumerHandle> {
        let (drained_tx, drained) = mpsc::sync_channel(1);
        let thread = thread::Builder::new()
            .name("event-log".to_owned())
            .spawn(move || {
                for event in self.receiver.iter() {
                    if let Err(error) = writer.write_event(&event) {
                        warn!(
                            target: EVENTS_TARGET,
                            error = %error,
                            "failed to write event"
                        );
                    }
                }
                if let Err(error) = writer.flush() {
                    warn!(
                        target: EVENTS_TARGET,
                        error = %error,
                        "failed to flush event log"
                    );
                }
                if drained_tx.send(()).is_err() {
                    debug!(target: EVENTS_TARGET, "drain waiter already gave up");
                }
            })?;
        Ok(ConsumerHandle {
            drained,
            thread: Some(thread),
        })
    }
}
