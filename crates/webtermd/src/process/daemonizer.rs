//! Detaches the daemon into the background when `--background` is passed.

use std::ffi::OsStr;
use std::path::Path;

use daemonize_me::Daemon;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Abstraction over daemonisation strategies.
#[cfg_attr(test, mockall::automock)]
pub trait Daemonizer: Send + Sync {
    /// Detaches the process into the background, keeping `work_dir` as the
    /// working directory so relative paths keep resolving.
    fn daemonize(&self, work_dir: &Path) -> Result<(), DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// System-level daemonisation failed.
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
    /// The working directory could not be determined.
    #[error("failed to resolve working directory: {0}")]
    WorkDir(#[source] std::io::Error),
}

/// Daemoniser that delegates to `daemonize-me`.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, work_dir: &Path) -> Result<(), DaemonizeError> {
        info!(
            target: PROCESS_TARGET,
            work_dir = %work_dir.display(),
            "detaching into background"
        );
        Daemon::new()
            .work_dir(work_dir)
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .start()?;
        info!(target: PROCESS_TARGET, "detached; continuing in child");
        Ok(())
    }
}

/// Launch mode chosen from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Detach from the controlling terminal.
    Background,
    /// Stay attached; the default.
    Foreground,
}

impl LaunchMode {
    /// Maps the `--background` flag onto a mode.
    #[must_use]
    pub fn from_flag(background: bool) -> Self {
        if background {
            Self::Background
        } else {
            Self::Foreground
        }
    }
}

/// Daemonises through `daemonizer` when `mode` asks for it.
pub fn enter_mode<D: Daemonizer + ?Sized>(
    mode: LaunchMode,
    daemonizer: &D,
) -> Result<(), DaemonizeError> {
    if mode == LaunchMode::Foreground {
        return Ok(());
    }
    let work_dir = std::env::current_dir().map_err(DaemonizeError::WorkDir)?;
    daemonizer.daemonize(&work_dir)
}
