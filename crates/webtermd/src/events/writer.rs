//! Formatting and sinks for the event log consumer.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Write};

use once_cell::sync::OnceCell;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use webterm_config::LogDestination;

use super::{Level, LogEvent};

const INFO_COLOUR: &str = "\u{1b}[36m";
const ERROR_COLOUR: &str = "\u{1b}[31m";
const RESET: &str = "\u{1b}[m";

static LOCAL_OFFSET: OnceCell<UtcOffset> = OnceCell::new();

/// Records the local UTC offset used for event timestamps.
///
/// The offset can only be read while the process is single-threaded, so the
/// binary calls this before anything spawns a thread. Timestamps are UTC when
/// it was never called or the lookup failed.
pub fn capture_local_offset() {
    LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC));
}

fn local_offset() -> UtcOffset {
    LOCAL_OFFSET.get().copied().unwrap_or(UtcOffset::UTC)
}

/// Writes formatted events to the configured sink.
pub struct EventWriter {
    sink: Option<Box<dyn Write + Send>>,
    colours: bool,
    pid: u32,
}

impl std::fmt::Debug for EventWriter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EventWriter")
            .field("discard", &self.sink.is_none())
            .field("colours", &self.colours)
            .field("pid", &self.pid)
            .finish()
    }
}

impl EventWriter {
    /// Opens the sink described by `destination`.
    pub fn open(destination: &LogDestination) -> io::Result<Self> {
        match destination {
            LogDestination::Stderr => Ok(Self::from_writer(
                Box::new(io::stderr()),
                io::stderr().is_terminal(),
            )),
            LogDestination::File(path) => {
                let mut options = OpenOptions::new();
                options.append(true).create(true);
                let file = options.open(path)?;
                Ok(Self::from_writer(Box::new(file), false))
            }
            LogDestination::Discard => Ok(Self::discard()),
        }
    }

    /// Wraps an arbitrary writer.
    #[must_use]
    pub fn from_writer(sink: Box<dyn Write + Send>, colours: bool) -> Self {
        Self {
            sink: Some(sink),
            colours,
            pid: std::process::id(),
        }
    }

    /// Writer that drops every event.
    #[must_use]
    pub fn discard() -> Self {
        Self {
            sink: None,
            colours: false,
            pid: std::process::id(),
        }
    }

    /// Formats and writes one event.
    pub fn write_event(&mut self, event: &LogEvent) -> io::Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let now = OffsetDateTime::now_utc().to_offset(local_offset());
        let line = format_event(self.pid, now, event, self.colours);
        sink.write_all(line.as_bytes())?;
        if let Some(stack) = &event.stack {
            sink.write_all(stack)?;
            if !stack.ends_with(b"\n") {
                sink.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    /// Flushes the sink.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

/// Renders `event` as one newline-terminated log line.
///
/// The layout is `[pid] YYYY/MM/DD HH:MM:SS # message`, with `ERROR:` in place
/// of `#` for error events and the error text appended after the message.
#[must_use]
pub fn format_event(pid: u32, at: OffsetDateTime, event: &LogEvent, colours: bool) -> String {
    let timestamp = at
        .format(format_description!(
            "[year]/[month]/[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_default();
    let delimiter = match event.level {
        Level::Info => "#",
        Level::Error => "ERROR:",
    };
    let prefix = if colours {
        let colour = match event.level {
            Level::Info => INFO_COLOUR,
            Level::Error => ERROR_COLOUR,
        };
        format!("{colour}[{pid}]{RESET}")
    } else {
        format!("[{pid}]")
    };
    let mut line = format!("{prefix} {timestamp} {delimiter} {}", event.message);
    if let Some(error) = &event.error {
        line.push(' ');
        line.push_str(error);
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    use crate::tests::support::SharedBuffer;

    #[test]
    fn info_lines_use_hash_delimiter() {
        let line = format_event(
            42,
            datetime!(2024-03-05 07:08:09 UTC),
            &LogEvent::info("listening on 0.0.0.0:5000"),
            false,
        );
        assert_eq!(line, "[42] 2024/03/05 07:08:09 # listening on 0.0.0.0:5000\n");
    }

    #[test]
    fn timestamps_render_in_the_given_offset() {
        let at = datetime!(2024-03-05 23:30:00 UTC).to_offset(time::macros::offset!(+2));
        let line = format_event(1, at, &LogEvent::info("tick"), false);
        assert_eq!(line, "[1] 2024/03/06 01:30:00 # tick\n");
    }

    #[test]
    fn captured_offset_is_stable() {
        capture_local_offset();
        let first = local_offset();
        capture_local_offset();
        assert_eq!(local_offset(), first);
    }

    #[test]
    fn error_lines_are_marked_and_coloured() {
        let event = LogEvent::error("etcd error", &io::Error::other("connection refused"));
        let line = format_event(7, datetime!(2024-03-05 07:08:09 UTC), &event, true);
        assert!(line.starts_with("\u{1b}[31m[7]\u{1b}[m "));
        assert!(line.ends_with("ERROR: etcd error connection refused\n"));
    }

    #[test]
    fn stacks_follow_the_event_line() {
        let buffer = SharedBuffer::default();
        let mut writer = EventWriter::from_writer(Box::new(buffer.clone()), false);
        let event = LogEvent::info("with stack").with_stack(b"frame 0\nframe 1".to_vec());
        writer.write_event(&event).expect("write event");
        let lines = buffer.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.get(1).map(String::as_str), Some("frame 0"));
    }

    #[test]
    fn file_destination_appends() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("events.log");
        for message in ["first", "second"] {
            let mut writer =
                EventWriter::open(&LogDestination::File(path.clone())).expect("open file sink");
            writer
                .write_event(&LogEvent::info(message))
                .expect("write event");
            writer.flush().expect("flush");
        }
        let contents = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(contents.lines().count(), 2);
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn discard_writer_accepts_everything() {
        let mut writer = EventWriter::open(&LogDestination::Discard).expect("discard sink");
        writer
            .write_event(&LogEvent::info("ignored"))
            .expect("discard never fails");
    }
}
