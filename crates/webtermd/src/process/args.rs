//! Launch flags handled by the process layer rather than the config loader.
//!
//! The graceful-restart marker (`--fd=N`) and `--background` are removed from
//! the argument vector before it reaches the configuration loader. The same
//! rules rebuild the argument vector for a successor process.

use std::ffi::{OsStr, OsString};
use std::os::fd::RawFd;

use thiserror::Error;

/// Flag telling a successor which descriptor holds its inherited listener.
pub const FD_FLAG: &str = "--fd";

/// Flag requesting the process detach into the background.
pub const BACKGROUND_FLAG: &str = "--background";

/// Descriptor number a successor finds its listener on: the first one after
/// the standard streams.
pub const INHERITED_FD: RawFd = 3;

/// Errors raised while interpreting launch flags.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    /// `--fd` was given without a value.
    #[error("--fd requires a descriptor number")]
    MissingFd,
    /// The `--fd` value was not a descriptor number.
    #[error("invalid descriptor '{value}' passed to --fd")]
    InvalidFd {
        /// Offending value.
        value: String,
    },
}

/// Launch flags split from the arguments destined for configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    /// The untouched argument vector, program name first.
    pub original: Vec<OsString>,
    /// Arguments forwarded to the configuration loader.
    pub config_args: Vec<OsString>,
    /// Inherited listening descriptor, when started by a predecessor.
    pub inherited_fd: Option<RawFd>,
    /// Whether `--background` was requested.
    pub background: bool,
}

enum Marker {
    Fd(Option<String>),
    Background,
}

fn classify(argument: &OsStr) -> Option<Marker> {
    let text = argument.to_str()?;
    let flag = text.strip_prefix('-').map(|rest| rest.trim_start_matches('-'))?;
    match flag.split_once('=') {
        Some(("fd", value)) => Some(Marker::Fd(Some(value.to_owned()))),
        None if flag == "fd" => Some(Marker::Fd(None)),
        None if flag == "background" => Some(Marker::Background),
        _ => None,
    }
}

fn parse_fd(value: &str) -> Result<Option<RawFd>, ArgsError> {
    let fd = value.parse::<RawFd>().map_err(|_| ArgsError::InvalidFd {
        value: value.to_owned(),
    })?;
    if fd < 0 {
        return Err(ArgsError::InvalidFd {
            value: value.to_owned(),
        });
    }
    Ok((fd > 0).then_some(fd))
}

impl LaunchArgs {
    /// Splits launch flags from `args` (program name first).
    pub fn parse(args: impl IntoIterator<Item = OsString>) -> Result<Self, ArgsError> {
        let original: Vec<OsString> = args.into_iter().collect();
        let mut config_args = Vec::with_capacity(original.len());
        let mut inherited_fd = None;
        let mut background = false;

        let mut iter = original.iter().enumerate();
        while let Some((index, argument)) = iter.next() {
            if index == 0 {
                config_args.push(argument.clone());
                continue;
            }
            match classify(argument) {
                Some(Marker::Background) => background = true,
                Some(Marker::Fd(Some(value))) => inherited_fd = parse_fd(&value)?,
                Some(Marker::Fd(None)) => {
                    let (_, value) = iter.next().ok_or(ArgsError::MissingFd)?;
                    let value = value.to_str().ok_or_else(|| ArgsError::InvalidFd {
                        value: value.to_string_lossy().into_owned(),
                    })?;
                    inherited_fd = parse_fd(value)?;
                }
                None => config_args.push(argument.clone()),
            }
        }

        Ok(Self {
            original,
            config_args,
            inherited_fd,
            background,
        })
    }

    /// Program path the process was started with.
    #[must_use]
    pub fn program(&self) -> Option<&OsStr> {
        self.original.first().map(OsString::as_os_str)
    }
}

/// Arguments (program name excluded) for a successor inheriting `fd`.
///
/// Any earlier descriptor marker and `--background` are dropped so the
/// successor stays attached and sees exactly one marker.
#[must_use]
pub fn successor_args(original: &[OsString], fd: RawFd) -> Vec<OsString> {
    let mut args = Vec::with_capacity(original.len());
    let mut iter = original.iter().skip(1);
    while let Some(argument) = iter.next() {
        match classify(argument) {
            Some(Marker::Fd(None)) => {
                iter.next();
            }
            Some(_) => {}
            None => args.push(argument.clone()),
        }
    }
    args.push(OsString::from(format!("{FD_FLAG}={fd}")));
    args
}
