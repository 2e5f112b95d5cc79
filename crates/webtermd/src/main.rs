use std::process::ExitCode;

use webtermd::{Config, events, telemetry};

fn main() -> ExitCode {
    events::capture_local_offset();
    match webtermd::run_harness() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Failures before telemetry came up still need a subscriber.
            drop(telemetry::initialise(&Config::default()));
            tracing::error!(target: "webtermd", error = %error, "webtermd exited with an error");
            ExitCode::FAILURE
        }
    }
}
