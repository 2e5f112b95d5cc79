//! Minimal TCP service hosted by the harness.

use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::events::EventSender;
use crate::lifecycle::{Service, ServiceError};

use super::{ConnectionHandler, GracefulListener, LISTENER_TARGET, ListenerError};

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Where the service obtains its listening socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenSource {
    /// Bind a fresh socket at the address.
    Address(String),
    /// Adopt a descriptor inherited from the predecessor process.
    Inherited {
        /// Descriptor number.
        fd: RawFd,
    },
}

type ReadyHook = Box<dyn FnOnce(&EventSender) + Send>;

/// Accepts connections on a [`GracefulListener`] and hands each one to a
/// [`ConnectionHandler`] on its own thread.
pub struct LineService {
    source: ListenSource,
    handler: Arc<dyn ConnectionHandler>,
    listener: OnceCell<Arc<GracefulListener>>,
    on_ready: Mutex<Option<ReadyHook>>,
}

impl fmt::Debug for LineService {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LineService")
            .field("source", &self.source)
            .field("listener", &self.listener.get())
            .finish_non_exhaustive()
    }
}

impl LineService {
    /// Builds a service that will listen according to `source`.
    pub fn new(source: ListenSource, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            source,
            handler,
            listener: OnceCell::new(),
            on_ready: Mutex::new(None),
        }
    }

    /// Where the socket comes from.
    #[must_use]
    pub fn source(&self) -> &ListenSource {
        &self.source
    }

    /// Registers a hook run once, right before the first accept.
    #[must_use]
    pub fn on_ready(self, hook: impl FnOnce(&EventSender) + Send + 'static) -> Self {
        *self.on_ready.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
        self
    }

    fn announce(&self, listener: &GracefulListener, events: &EventSender) {
        let addr = listener
            .local_addr()
            .map_or_else(|| "unknown address".to_owned(), |addr| addr.to_string());
        match &self.source {
            ListenSource::Address(_) => events.info(format!("listening on {addr}")),
            ListenSource::Inherited { fd } => {
                events.info(format!("listening on existing file descriptor {fd}, {addr}"))
            }
        };
        let hook = self
            .on_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook(events);
        }
    }
}

impl Service for LineService {
    fn bind(&self) -> Result<(), ServiceError> {
        if self.listener.get().is_some() {
            return Ok(());
        }
        let listener = match &self.source {
            ListenSource::Address(addr) => GracefulListener::bind(addr)?,
            ListenSource::Inherited { fd } => GracefulListener::from_inherited_fd(*fd)?,
        };
        // A concurrent bind that won the race keeps its socket.
        drop(self.listener.set(Arc::new(listener)));
        Ok(())
    }

    fn serve(&self, events: &EventSender) -> Result<(), ServiceError> {
        let listener = Arc::clone(self.listener.get().ok_or(ListenerError::NotBound)?);
        self.announce(&listener, events);
        let mut last_error = None::<io::ErrorKind>;
        loop {
            match listener.accept() {
                Ok(connection) => {
                    last_error = None;
                    let handler = Arc::clone(&self.handler);
                    if let Err(error) = thread::Builder::new()
                        .name("connection".to_owned())
                        .spawn(move || handler.handle(connection))
                    {
                        events.error("failed to spawn connection handler", &error);
                    }
                }
                Err(_) if listener.is_stopped() => {
                    debug!(
                        target: LISTENER_TARGET,
                        open_connections = listener.open_connections(),
                        "accept loop finished"
                    );
                    return Ok(());
                }
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        events.error("socket accept error", &error);
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
    }

    fn stop_listening(&self) {
        let Some(listener) = self.listener.get() else {
            return;
        };
        match listener.close() {
            Ok(()) | Err(ListenerError::AlreadyClosed) => {}
            Err(error) => warn!(
                target: LISTENER_TARGET,
                error = %error,
                "failed to close listener"
            ),
        }
    }

    fn listener(&self) -> Option<Arc<GracefulListener>> {
        self.listener.get().cloned()
    }
}
