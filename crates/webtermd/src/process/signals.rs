//! Routes process signals to restart or shutdown.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{debug, info};

use super::PROCESS_TARGET;
use super::errors::SignalError;

/// Signals the watcher subscribes to.
pub const WATCHED_SIGNALS: [i32; 4] = [SIGHUP, SIGINT, SIGTERM, SIGQUIT];

/// What a received signal asks the process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Hand the listener to a successor.
    Restart,
    /// Drain and exit.
    Shutdown,
}

impl SignalAction {
    /// Maps a raw signal number onto an action.
    #[must_use]
    pub fn for_signal(signal: i32) -> Option<Self> {
        match signal {
            SIGHUP => Some(Self::Restart),
            SIGINT | SIGTERM | SIGQUIT => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// Receiver of signal-driven requests.
pub trait SignalHandler: Send + Sync + 'static {
    /// Called on SIGHUP.
    fn restart(&self);
    /// Called on SIGINT, SIGTERM, or SIGQUIT.
    fn shutdown(&self);
}

/// Applies `signal` to `handler`. Breaks once a shutdown was requested.
pub(crate) fn dispatch(signal: i32, handler: &dyn SignalHandler) -> ControlFlow<()> {
    info!(target: PROCESS_TARGET, signal, "signal received");
    match SignalAction::for_signal(signal) {
        Some(SignalAction::Restart) => {
            handler.restart();
            ControlFlow::Continue(())
        }
        Some(SignalAction::Shutdown) => {
            handler.shutdown();
            ControlFlow::Break(())
        }
        None => ControlFlow::Continue(()),
    }
}

/// Background thread delivering [`WATCHED_SIGNALS`] to a [`SignalHandler`].
///
/// The thread exits after the first shutdown signal or once
/// [`stop`](Self::stop) is called.
#[derive(Debug)]
pub struct SignalWatcher {
    handle: Handle,
}

impl SignalWatcher {
    /// Installs the signal handlers and starts the watcher thread.
    pub fn spawn(handler: Arc<dyn SignalHandler>) -> Result<Self, SignalError> {
        let mut signals =
            Signals::new(WATCHED_SIGNALS).map_err(|source| SignalError::Install { source })?;
        let handle = signals.handle();
        thread::Builder::new()
            .name("signal-watcher".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    if dispatch(signal, handler.as_ref()).is_break() {
                        break;
                    }
                }
                debug!(target: PROCESS_TARGET, "signal watcher finished");
            })
            .map_err(|source| SignalError::Spawn { source })?;
        Ok(Self { handle })
    }

    /// Stops the watcher thread. Safe to call from the watcher itself.
    pub fn stop(&self) {
        self.handle.close();
    }
}
