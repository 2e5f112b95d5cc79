//! Orchestration of one service generation.
//!
//! [`WorkClient`] owns the event log, the metrics sampler, the heartbeat
//! publisher, and the signal watcher around a hosted [`Service`]. Closing
//! follows a fixed order: stop listening, stop the periodic tasks, drain the
//! event log, then release the caller blocked in [`WorkClient::run`].

mod client;
mod errors;
mod service;
mod state;

pub use client::{Collaborators, ShutdownHandle, WorkClient};
pub use errors::LifecycleError;
pub use service::{Service, ServiceError};
pub use state::LifecycleState;

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");
