//! Process-lifecycle harness for the webterm service.
//!
//! The harness hosts one network [`Service`] per process generation and keeps
//! a small set of background subsystems alive next to it: the ordered
//! [`events`] log, the runtime [`metrics`] sampler, and the discovery
//! [`heartbeat`]. [`WorkClient`] owns all of them and closes them in a fixed
//! order, so a shutdown never loses buffered log lines.
//!
//! ## Zero-downtime restart
//!
//! On `SIGHUP` the [`RestartCoordinator`] duplicates the listening socket,
//! starts the same binary with the descriptor installed as fd 3 and `--fd=3`
//! appended to its arguments, and keeps serving. The successor adopts the
//! inherited socket instead of binding, and once its accept loop is ready it
//! sends `SIGTERM` to its parent, which drains and exits. Clients never see
//! a refused connection because the socket stays open across the handoff.

pub mod events;
pub mod heartbeat;
pub mod lifecycle;
pub mod metrics;
pub mod process;
pub mod telemetry;
pub mod transport;

pub use events::{EventSender, Level, LogEvent};
pub use lifecycle::{
    Collaborators, LifecycleError, LifecycleState, Service, ServiceError, ShutdownHandle,
    WorkClient,
};
pub use process::{LaunchError, RestartCoordinator, run_harness};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{GracefulListener, LineService, ListenSource};
pub use webterm_config::Config;

#[cfg(test)]
mod tests;
