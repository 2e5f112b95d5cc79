//! Error types for the graceful listener and the line service.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// Errors surfaced while binding, handing off, or closing a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// No address could be resolved for the configured bind address.
    #[error("failed to resolve listen address {addr}: {source}")]
    Resolve {
        /// Configured address.
        addr: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// The configured address resolved to nothing.
    #[error("no addresses resolved for {addr}")]
    ResolveEmpty {
        /// Configured address.
        addr: String,
    },
    /// Binding the socket failed, typically because the address is in use.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    Bind {
        /// Configured address.
        addr: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// An inherited descriptor was not a usable listening socket.
    #[error("inherited descriptor {fd} is not a listening socket: {source}")]
    Inherited {
        /// Descriptor number passed by the predecessor.
        fd: RawFd,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Switching the socket to non-blocking mode failed.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the thread that owns the socket failed.
    #[error("failed to start listener owner thread: {source}")]
    Owner {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The owner thread went away before acknowledging a close.
    #[error("listener owner thread exited before acknowledging close")]
    OwnerLost,
    /// The listener has already been closed.
    #[error("listener already closed")]
    AlreadyClosed,
    /// Closing the socket failed.
    #[error("failed to close listener socket: {source}")]
    Close {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Duplicating the socket for handoff failed.
    #[error("failed to duplicate listener descriptor: {source}")]
    Duplicate {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `serve` ran before `bind`.
    #[error("service is not bound")]
    NotBound,
}
