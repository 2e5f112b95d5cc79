//! Listening socket, tracked connections, and the hosted line service.
//!
//! [`GracefulListener`] owns the service socket for the lifetime of one
//! process generation; [`LineService`] drives its accept loop.

mod connection;
mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod listener_tests;
mod service;
#[cfg(test)]
pub(crate) mod test_utils;

pub use self::connection::TrackedConnection;
pub use self::errors::ListenerError;
pub use self::handler::{ConnectionHandler, ConnectionLimits, EchoHandler};
pub use self::listener::GracefulListener;
pub use self::service::{ListenSource, LineService};

pub(crate) const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
