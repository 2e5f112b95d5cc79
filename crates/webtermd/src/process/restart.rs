//! Zero-downtime restart: start a successor that inherits the listening
//! descriptor, then let the current generation drain.

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, dup2, getppid};
use tracing::{debug, info};

use crate::events::EventSender;
use crate::transport::GracefulListener;

use super::PROCESS_TARGET;
use super::args::{INHERITED_FD, successor_args};
use super::errors::RestartError;

/// Everything needed to start one successor process.
#[derive(Debug)]
pub struct SuccessorPlan {
    /// Program to execute.
    pub program: OsString,
    /// Arguments, program name excluded, already carrying the `--fd` marker.
    pub args: Vec<OsString>,
    /// Duplicate of the listening descriptor. Closed in this process once the
    /// spawn returns.
    pub listener_fd: OwnedFd,
    /// Descriptor number the successor expects the listener on.
    pub target_fd: RawFd,
}

/// Starts successor processes.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSpawner: Send + Sync {
    /// Starts the successor described by `plan`, returning its pid.
    fn spawn(&self, plan: SuccessorPlan) -> io::Result<u32>;
}

impl<S: ProcessSpawner + ?Sized> ProcessSpawner for Box<S> {
    fn spawn(&self, plan: SuccessorPlan) -> io::Result<u32> {
        (**self).spawn(plan)
    }
}

/// Spawner that executes the program with the listener remapped onto
/// `target_fd` and the standard streams inherited.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl ProcessSpawner for SystemSpawner {
    fn spawn(&self, plan: SuccessorPlan) -> io::Result<u32> {
        let source = plan.listener_fd.as_raw_fd();
        let target = plan.target_fd;
        let mut command = Command::new(&plan.program);
        command
            .args(&plan.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        // SAFETY: the hook only calls async-signal-safe fcntl/dup2 between
        // fork and exec.
        unsafe {
            command.pre_exec(move || {
                if source == target {
                    fcntl(target, FcntlArg::F_SETFD(FdFlag::empty()))?;
                } else {
                    // dup2 never sets close-on-exec on the new descriptor.
                    dup2(source, target)?;
                }
                Ok(())
            });
        }
        let child = command.spawn()?;
        drop(plan.listener_fd);
        Ok(child.id())
    }
}

/// Hands the listening socket to a freshly started copy of this program.
#[derive(Debug)]
pub struct RestartCoordinator<S = SystemSpawner> {
    argv: Vec<OsString>,
    spawner: S,
}

impl RestartCoordinator<SystemSpawner> {
    /// Coordinator that re-executes `argv[0]` with the remaining arguments.
    #[must_use]
    pub fn new(argv: Vec<OsString>) -> Self {
        Self::with_spawner(argv, SystemSpawner)
    }
}

impl<S: ProcessSpawner> RestartCoordinator<S> {
    /// Coordinator using a custom spawner.
    pub fn with_spawner(argv: Vec<OsString>, spawner: S) -> Self {
        Self { argv, spawner }
    }

    /// Arguments the successor would be started with.
    #[must_use]
    pub fn successor_args(&self) -> Vec<OsString> {
        successor_args(&self.argv, INHERITED_FD)
    }

    /// Starts a successor inheriting `listener`'s descriptor.
    ///
    /// The listener itself stays open; the caller decides when this
    /// generation stops accepting.
    pub fn restart(&self, listener: &GracefulListener) -> Result<u32, RestartError> {
        let program = self
            .argv
            .first()
            .filter(|program| !program.is_empty())
            .cloned()
            .ok_or(RestartError::MissingProgram)?;
        let listener_fd = listener.file()?;
        debug!(
            target: PROCESS_TARGET,
            source_fd = listener_fd.as_raw_fd(),
            target_fd = INHERITED_FD,
            "duplicated listener for successor"
        );
        let plan = SuccessorPlan {
            program: program.clone(),
            args: self.successor_args(),
            listener_fd,
            target_fd: INHERITED_FD,
        };
        let pid = self
            .spawner
            .spawn(plan)
            .map_err(|source| RestartError::Spawn { program, source })?;
        info!(target: PROCESS_TARGET, successor_pid = pid, "successor started");
        Ok(pid)
    }
}

/// Asks the predecessor that started this process to shut down.
///
/// Called by a successor once its inherited listener is ready. A parent that
/// already exited (re-parented to init) is left alone.
pub fn notify_predecessor(events: &EventSender) {
    let parent = getppid();
    if parent.as_raw() <= 1 {
        debug!(target: PROCESS_TARGET, "no predecessor to notify");
        return;
    }
    terminate(parent, events);
}

fn terminate(parent: Pid, events: &EventSender) {
    match kill(parent, Signal::SIGTERM) {
        Ok(()) => {
            events.info(format!("asked predecessor {parent} to shut down"));
        }
        Err(errno) => {
            events.error(
                format!("failed to signal predecessor {parent}"),
                &io::Error::from(errno),
            );
        }
    }
}
