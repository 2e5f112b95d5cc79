//! Accepted connections that keep the listener's open-connection count.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A connection accepted by a [`GracefulListener`](super::GracefulListener).
///
/// The owning listener's counter is decremented exactly once, on the first
/// call to [`close`](Self::close) or on drop, whichever happens first.
#[derive(Debug)]
pub struct TrackedConnection {
    stream: TcpStream,
    peer: SocketAddr,
    released: AtomicBool,
    open: Arc<AtomicUsize>,
}

impl TrackedConnection {
    pub(super) fn new(stream: TcpStream, peer: SocketAddr, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            stream,
            peer,
            released: AtomicBool::new(false),
            open,
        }
    }

    /// Remote address of the client.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Applies read and write timeouts to the underlying stream.
    pub fn set_timeouts(&self, read: Duration, write: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(non_zero(read))?;
        self.stream.set_write_timeout(non_zero(write))
    }

    /// Shuts the stream down and releases the connection from the count.
    ///
    /// Repeated calls are harmless; only the first one touches the counter.
    pub fn close(&self) -> io::Result<()> {
        if !self.release() {
            return Ok(());
        }
        match self.stream.shutdown(Shutdown::Both) {
            Err(error) if error.kind() != io::ErrorKind::NotConnected => Err(error),
            _ => Ok(()),
        }
    }

    fn release(&self) -> bool {
        let first = !self.released.swap(true, Ordering::SeqCst);
        if first {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        first
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        self.release();
    }
}

impl Read for TrackedConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TrackedConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
