//! Listening socket that can be closed from any thread and handed to a
//! successor process.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use tracing::{debug, info};

use super::{LISTENER_TARGET, ListenerError, TrackedConnection};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);

type SharedSocket = Arc<Mutex<Option<TcpListener>>>;

struct CloseHandshake {
    request: SyncSender<()>,
    reply: Receiver<io::Result<()>>,
}

/// Listening socket with a cooperative, exactly-once close.
///
/// The socket lives in non-blocking mode; [`accept`](Self::accept) polls it
/// with a short backoff so a concurrent [`close`](Self::close) interrupts a
/// waiting caller within one backoff period. Closing is a handshake with a
/// dedicated owner thread, which marks the listener stopped, closes the
/// descriptor, and reports the result back.
pub struct GracefulListener {
    socket: SharedSocket,
    local_addr: Option<SocketAddr>,
    stopped: Arc<AtomicBool>,
    control: Mutex<Option<CloseHandshake>>,
    open: Arc<AtomicUsize>,
}

impl std::fmt::Debug for GracefulListener {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("GracefulListener")
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.is_stopped())
            .field("open_connections", &self.open_connections())
            .finish()
    }
}

impl GracefulListener {
    /// Binds a fresh socket at `addr`.
    pub fn bind(addr: &str) -> Result<Self, ListenerError> {
        let mut addrs = addr
            .to_socket_addrs()
            .map_err(|source| ListenerError::Resolve {
                addr: addr.to_owned(),
                source,
            })?;
        let resolved = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
            addr: addr.to_owned(),
        })?;
        let listener = TcpListener::bind(resolved).map_err(|source| ListenerError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        Self::new(listener)
    }

    /// Wraps a listening descriptor inherited from a predecessor process.
    ///
    /// The descriptor is marked close-on-exec again so it only reaches later
    /// successors through an explicit handoff.
    pub fn from_inherited_fd(fd: RawFd) -> Result<Self, ListenerError> {
        let to_error = |errno: nix::errno::Errno| ListenerError::Inherited {
            fd,
            source: io::Error::from(errno),
        };
        fcntl(fd, FcntlArg::F_GETFD).map_err(to_error)?;
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(to_error)?;
        // SAFETY: the descriptor is open (checked above) and was handed to
        // this process for exclusive use by its predecessor.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        let listener = TcpListener::from(owned);
        listener
            .local_addr()
            .map_err(|source| ListenerError::Inherited { fd, source })?;
        Self::new(listener)
    }

    /// Wraps an already bound listener.
    pub fn new(listener: TcpListener) -> Result<Self, ListenerError> {
        listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let local_addr = listener.local_addr().ok();
        let socket: SharedSocket = Arc::new(Mutex::new(Some(listener)));
        let stopped = Arc::new(AtomicBool::new(false));
        let (request, requests) = mpsc::sync_channel(0);
        let (replies, reply) = mpsc::sync_channel(1);

        let owner_socket = Arc::clone(&socket);
        let owner_stopped = Arc::clone(&stopped);
        thread::Builder::new()
            .name("listener-owner".to_owned())
            .spawn(move || {
                // A disconnected control channel means the listener was
                // dropped without an explicit close.
                if requests.recv().is_err() {
                    return;
                }
                let result = close_socket(&owner_socket, &owner_stopped);
                debug!(
                    target: LISTENER_TARGET,
                    ok = result.is_ok(),
                    "listener socket released"
                );
                drop(replies.send(result));
            })
            .map_err(|source| ListenerError::Owner { source })?;

        Ok(Self {
            socket,
            local_addr,
            stopped,
            control: Mutex::new(Some(CloseHandshake { request, reply })),
            open: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Waits for the next connection.
    ///
    /// Errors are returned unchanged. Once the listener has been closed this
    /// returns a `NotConnected` error; callers should check
    /// [`is_stopped`](Self::is_stopped) to treat that as a normal shutdown.
    pub fn accept(&self) -> io::Result<TrackedConnection> {
        loop {
            {
                let guard = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(socket) = guard.as_ref().filter(|_| !self.is_stopped()) else {
                    return Err(closed_error());
                };
                match socket.accept() {
                    Ok((stream, peer)) => {
                        stream.set_nonblocking(false)?;
                        return Ok(TrackedConnection::new(stream, peer, Arc::clone(&self.open)));
                    }
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => return Err(error),
                }
            }
            thread::sleep(ACCEPT_BACKOFF);
        }
    }

    /// Stops accepting and releases the socket.
    ///
    /// Safe to call while another thread waits in [`accept`](Self::accept).
    /// Only the first call performs the close; later calls return
    /// [`ListenerError::AlreadyClosed`] without touching the socket.
    pub fn close(&self) -> Result<(), ListenerError> {
        let handshake = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ListenerError::AlreadyClosed)?;
        handshake
            .request
            .send(())
            .map_err(|_| ListenerError::OwnerLost)?;
        let result = handshake.reply.recv().map_err(|_| ListenerError::OwnerLost)?;
        info!(
            target: LISTENER_TARGET,
            addr = ?self.local_addr,
            open_connections = self.open_connections(),
            "listener closed"
        );
        result.map_err(|source| ListenerError::Close { source })
    }

    /// Duplicates the listening descriptor for handoff to a successor.
    pub fn file(&self) -> Result<OwnedFd, ListenerError> {
        let guard = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        let socket = guard.as_ref().ok_or(ListenerError::AlreadyClosed)?;
        let duplicate = socket
            .try_clone()
            .map_err(|source| ListenerError::Duplicate { source })?;
        Ok(OwnedFd::from(duplicate))
    }

    /// Whether [`close`](Self::close) has taken effect.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of accepted connections not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Address the socket is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Raw descriptor of the live socket, if still open.
    #[must_use]
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(AsRawFd::as_raw_fd)
    }
}

/// Marks the listener stopped and releases its descriptor under the socket
/// lock, so no `accept` can complete once the flag is visible.
fn close_socket(socket: &SharedSocket, stopped: &AtomicBool) -> io::Result<()> {
    let taken = {
        let mut guard = socket.lock().unwrap_or_else(PoisonError::into_inner);
        stopped.store(true, Ordering::SeqCst);
        guard.take()
    };
    match taken {
        Some(listener) => {
            let fd = OwnedFd::from(listener).into_raw_fd();
            nix::unistd::close(fd).map_err(io::Error::from)
        }
        None => Ok(()),
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "listener closed")
}
