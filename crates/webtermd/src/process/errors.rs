//! Error surface for process startup, restart, and signal handling.

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

use crate::lifecycle::LifecycleError;
use crate::telemetry::TelemetryError;
use crate::transport::ListenerError;

use super::args::ArgsError;
use super::daemonizer::DaemonizeError;

/// Errors raised while spawning a successor generation.
#[derive(Debug, Error)]
pub enum RestartError {
    /// The program path could not be determined from the launch arguments.
    #[error("cannot restart: program path unknown")]
    MissingProgram,
    /// No listener is active, so there is nothing to hand over.
    #[error("cannot restart: no active listener to hand over")]
    NoListener,
    /// Duplicating the listening descriptor failed.
    #[error("failed to duplicate listening descriptor: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// Starting the successor process failed.
    #[error("failed to spawn successor {program:?}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: OsString,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl From<ListenerError> for RestartError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}

/// Errors reported by the signal watcher.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The watcher thread could not be started.
    #[error("failed to start signal watcher: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced while launching the daemon from `main`.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Launch flags were malformed.
    #[error("invalid launch arguments: {source}")]
    Args {
        /// Underlying parse error.
        #[source]
        source: ArgsError,
    },
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Installing the tracing subscriber failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Daemonisation failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// The orchestrator failed to configure or run.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl From<ArgsError> for LaunchError {
    fn from(source: ArgsError) -> Self {
        Self::Args { source }
    }
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<DaemonizeError> for LaunchError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}
