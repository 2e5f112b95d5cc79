//! Launch sequence of the `webtermd` binary.

use std::env;
use std::ffi::OsString;
use std::os::fd::RawFd;
use std::sync::Arc;

use tracing::info;

use ortho_config::OrthoConfig;
use webterm_config::Config;

use crate::lifecycle::{Collaborators, WorkClient};
use crate::telemetry;
use crate::transport::{ConnectionLimits, EchoHandler, LineService, ListenSource};

use super::args::LaunchArgs;
use super::daemonizer::{Daemonizer, LaunchMode, SystemDaemonizer, enter_mode};
use super::errors::LaunchError;
use super::restart::notify_predecessor;
use super::PROCESS_TARGET;

/// Runs the harness with the process arguments and production collaborators.
pub fn run_harness() -> Result<(), LaunchError> {
    run_harness_with(env::args_os(), &SystemDaemonizer)
}

/// Runs the harness with explicit arguments (program name first) and
/// daemoniser.
///
/// Launch flags are split off first, the process detaches when asked to,
/// and only then is configuration loaded, so a daemonised process reads its
/// environment after the fork.
pub fn run_harness_with<D: Daemonizer + ?Sized>(
    args: impl IntoIterator<Item = OsString>,
    daemonizer: &D,
) -> Result<(), LaunchError> {
    let launch = LaunchArgs::parse(args)?;
    enter_mode(LaunchMode::from_flag(launch.background), daemonizer)?;
    let config = Config::load_from_iter(launch.config_args.clone())?;
    telemetry::initialise(&config)?;
    info!(
        target: PROCESS_TARGET,
        inherited_fd = ?launch.inherited_fd,
        background = launch.background,
        "launching"
    );

    let service = Arc::new(line_service(&config, launch.inherited_fd));
    let collaborators = Collaborators {
        argv: launch.original,
        ..Collaborators::from_config(&config)?
    };
    WorkClient::configure_with(config, service, collaborators)?.run()?;
    Ok(())
}

/// Builds the hosted line service, adopting `inherited_fd` when present.
///
/// A successor with `terminate_parent` set asks its predecessor to shut down
/// once its accept loop is about to start.
#[must_use]
pub fn line_service(config: &Config, inherited_fd: Option<RawFd>) -> LineService {
    let handler = Arc::new(EchoHandler::new(ConnectionLimits {
        read_timeout: config.read_timeout(),
        write_timeout: config.write_timeout(),
        max_request_bytes: config.web_max_header_bytes,
    }));
    match inherited_fd {
        Some(fd) => {
            let service = LineService::new(ListenSource::Inherited { fd }, handler);
            if config.terminate_parent {
                service.on_ready(notify_predecessor)
            } else {
                service
            }
        }
        None => LineService::new(ListenSource::Address(config.web_addr.clone()), handler),
    }
}
