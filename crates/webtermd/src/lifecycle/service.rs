//! The seam between the orchestrator and the service it hosts.

use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

use crate::events::EventSender;
use crate::transport::{GracefulListener, ListenerError};

/// Errors reported by a hosted service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The listening socket failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// Any other service failure.
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync + 'static>),
}

/// A network service run by [`WorkClient`](super::WorkClient).
///
/// The orchestrator calls [`bind`](Self::bind) once before anything else
/// starts, then [`serve`](Self::serve) on the calling thread. Shutdown calls
/// [`stop_listening`](Self::stop_listening) from another thread, which must
/// make `serve` return `Ok`.
pub trait Service: Send + Sync + 'static {
    /// Acquires the listening socket.
    fn bind(&self) -> Result<(), ServiceError>;

    /// Runs the accept loop until the listener is stopped.
    fn serve(&self, events: &EventSender) -> Result<(), ServiceError>;

    /// Stops accepting new connections. Must tolerate repeated calls.
    fn stop_listening(&self);

    /// The listener that a restart hands to a successor.
    fn listener(&self) -> Option<Arc<GracefulListener>> {
        None
    }
}
