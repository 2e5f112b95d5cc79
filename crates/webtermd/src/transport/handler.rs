//! Connection handling for the line service.

use std::io::{self, Read, Write};
use std::time::Duration;

use tracing::warn;

use super::{LISTENER_TARGET, TrackedConnection};

/// Handles accepted connections.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection. Implementations should avoid panicking.
    fn handle(&self, connection: TrackedConnection);
}

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Read timeout; zero disables it.
    pub read_timeout: Duration,
    /// Write timeout; zero disables it.
    pub write_timeout: Duration,
    /// Longest accepted request line, newline included.
    pub max_request_bytes: usize,
}

/// Reads one bounded request line and writes it back.
#[derive(Debug, Clone, Copy)]
pub struct EchoHandler {
    limits: ConnectionLimits,
}

impl EchoHandler {
    /// Builds a handler enforcing `limits`.
    #[must_use]
    pub const fn new(limits: ConnectionLimits) -> Self {
        Self { limits }
    }
}

impl ConnectionHandler for EchoHandler {
    fn handle(&self, mut connection: TrackedConnection) {
        if let Err(error) = self.respond(&mut connection) {
            warn!(
                target: LISTENER_TARGET,
                peer = %connection.peer_addr(),
                error = %error,
                "connection handler error"
            );
        }
        if let Err(error) = connection.close() {
            warn!(
                target: LISTENER_TARGET,
                error = %error,
                "failed to close connection"
            );
        }
    }
}

impl EchoHandler {
    fn respond(&self, connection: &mut TrackedConnection) -> io::Result<()> {
        connection.set_timeouts(self.limits.read_timeout, self.limits.write_timeout)?;
        let Some(line) = read_request_line(connection, self.limits.max_request_bytes)? else {
            return Ok(());
        };
        connection.write_all(&line)?;
        if !line.ends_with(b"\n") {
            connection.write_all(b"\n")?;
        }
        connection.flush()
    }
}

fn read_request_line(
    stream: &mut impl Read,
    max_request_bytes: usize,
) -> io::Result<Option<Vec<u8>>> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let bytes_read = read_chunk_with_retry(stream, &mut chunk)?;
        if bytes_read == 0 {
            return Ok((!buffer.is_empty()).then_some(buffer));
        }
        let received = chunk.get(..bytes_read).unwrap_or_default();
        if let Some(pos) = received.iter().position(|byte| *byte == b'\n') {
            buffer.extend_from_slice(received.get(..=pos).unwrap_or_default());
            enforce_request_limit(buffer.len(), max_request_bytes)?;
            return Ok(Some(buffer));
        }
        buffer.extend_from_slice(received);
        enforce_request_limit(buffer.len(), max_request_bytes)?;
    }
}

fn read_chunk_with_retry(stream: &mut impl Read, chunk: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}

fn enforce_request_limit(size: usize, max_request_bytes: usize) -> io::Result<()> {
    if size > max_request_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "request exceeds maximum size",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_up_to_the_first_newline() {
        let mut input = Cursor::new(b"hello\nworld\n".to_vec());
        let line = read_request_line(&mut input, 64).expect("read line");
        assert_eq!(line.as_deref(), Some(&b"hello\n"[..]));
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let mut input = Cursor::new(Vec::new());
        assert_eq!(read_request_line(&mut input, 64).expect("read"), None);
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let mut input = Cursor::new(vec![b'a'; 2048]);
        let error = read_request_line(&mut input, 100).expect_err("limit enforced");
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }
}
