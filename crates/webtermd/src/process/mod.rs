//! Process-level concerns: launch flags, daemonising, signals, hostname, and
//! the listener handoff to a successor generation.

pub(crate) mod args;
pub(crate) mod daemonizer;
mod errors;
pub(crate) mod hostname;
pub(crate) mod launch;
pub(crate) mod restart;
pub(crate) mod signals;

pub use args::{ArgsError, BACKGROUND_FLAG, FD_FLAG, INHERITED_FD, LaunchArgs, successor_args};
pub use daemonizer::{DaemonizeError, Daemonizer, LaunchMode, SystemDaemonizer, enter_mode};
pub use errors::{LaunchError, RestartError, SignalError};
pub use hostname::{HostnameError, resolve_hostname, system_hostname};
pub use launch::{line_service, run_harness, run_harness_with};
pub use restart::{
    ProcessSpawner, RestartCoordinator, SuccessorPlan, SystemSpawner, notify_predecessor,
};
pub use signals::{SignalAction, SignalHandler, SignalWatcher};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
