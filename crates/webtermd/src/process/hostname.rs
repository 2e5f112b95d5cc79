//! Hostname resolution for heartbeat keys.

use std::env;
use std::io;

use thiserror::Error;

/// Environment variable consulted when the configuration names no hostname.
pub const HOSTNAME_ENV_VAR: &str = "HOSTNAME";

/// Raised when no source yields a hostname.
#[derive(Debug, Error)]
pub enum HostnameError {
    /// Every source was empty.
    #[error("unable to determine hostname: configuration, HOSTNAME and the system are all empty")]
    Empty,
    /// The operating system lookup failed.
    #[error("unable to determine hostname: {source}")]
    System {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Picks the first non-empty hostname from the configured value, the
/// environment, and the operating system, in that order.
pub fn resolve_hostname(
    configured: Option<&str>,
    environment: Option<String>,
    system: impl FnOnce() -> io::Result<String>,
) -> Result<String, HostnameError> {
    let non_empty = |value: &str| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    };
    if let Some(name) = configured.and_then(non_empty) {
        return Ok(name);
    }
    if let Some(name) = environment.as_deref().and_then(non_empty) {
        return Ok(name);
    }
    match system() {
        Ok(name) => non_empty(&name).ok_or(HostnameError::Empty),
        Err(source) => Err(HostnameError::System { source }),
    }
}

/// Resolves the hostname against the live environment and kernel.
pub fn system_hostname(configured: Option<&str>) -> Result<String, HostnameError> {
    resolve_hostname(configured, env::var(HOSTNAME_ENV_VAR).ok(), || {
        nix::unistd::gethostname()
            .map(|name| name.to_string_lossy().into_owned())
            .map_err(io::Error::from)
    })
}
