use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Setting of `stderr_logfile` that silences the event log entirely.
pub const DISCARD_LOG_PATH: &str = "/dev/null";

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
    /// Human-readable single line output.
    #[default]
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Sink the event log writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Standard error, coloured when attached to a terminal.
    Stderr,
    /// Append to the given file without colours.
    File(PathBuf),
    /// Drop every event.
    Discard,
}

impl LogDestination {
    /// Interprets the `stderr_logfile` setting.
    #[must_use]
    pub fn from_setting(setting: Option<&str>) -> Self {
        match setting {
            None | Some("") => Self::Stderr,
            Some(DISCARD_LOG_PATH) => Self::Discard,
            Some(path) => Self::File(PathBuf::from(path)),
        }
    }
}
