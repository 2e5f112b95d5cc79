use std::fmt;

/// Phase of a [`WorkClient`](super::WorkClient).
///
/// Moves strictly forward: `Configured → Running → Draining → Closed`. A
/// failed startup goes straight from `Configured` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Configured but not yet running.
    Configured,
    /// Serving.
    Running,
    /// Shutting down.
    Draining,
    /// Finished; the quit signal has fired.
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        })
    }
}
