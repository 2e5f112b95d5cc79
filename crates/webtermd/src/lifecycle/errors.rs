//! Error surface of the orchestrator.

use std::io;

use thiserror::Error;

use crate::heartbeat::DiscoveryError;
use crate::metrics::MetricsError;
use crate::process::{HostnameError, RestartError};

use super::service::ServiceError;
use super::state::LifecycleState;

/// Errors raised while configuring, running, or closing a
/// [`WorkClient`](super::WorkClient).
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// State at the time.
        state: LifecycleState,
    },
    /// No hostname could be resolved.
    #[error(transparent)]
    Hostname(#[from] HostnameError),
    /// The heartbeat announcement could not be serialised.
    #[error("failed to serialise heartbeat announcement: {source}")]
    Announcement {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// The event log destination could not be opened.
    #[error("failed to open event log: {source}")]
    EventSink {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The discovery store could not be set up.
    #[error("failed to set up discovery store: {source}")]
    Discovery {
        /// Underlying store error.
        #[from]
        source: DiscoveryError,
    },
    /// Metric registration or sink setup failed.
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    /// The service socket could not be acquired.
    #[error("failed to bind service: {source}")]
    Bind {
        /// Underlying service error.
        #[source]
        source: ServiceError,
    },
    /// The service failed while running.
    #[error("service failed: {source}")]
    Serve {
        /// Underlying service error.
        #[source]
        source: ServiceError,
    },
    /// A background thread could not be started.
    #[error("failed to start {task} thread: {source}")]
    Spawn {
        /// Task name.
        task: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Handing the listener to a successor failed.
    #[error(transparent)]
    Restart(#[from] RestartError),
}
