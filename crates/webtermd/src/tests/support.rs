//! Test doubles shared by the orchestrator suites.

use std::ffi::OsString;
use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use webterm_config::Config;

use crate::events::{EventSender, EventWriter};
use crate::heartbeat::{DiscoveryError, DiscoveryStore};
use crate::lifecycle::{Collaborators, LifecycleState, Service, ServiceError, WorkClient};
use crate::process::restart::MockProcessSpawner;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// In-memory writer that can be inspected while another thread writes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().expect("buffer lock")).into_owned()
    }

    /// Written lines without their terminators.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }

    /// Number of lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|line| line.contains(needle)).count()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Ordered record of calls made by the orchestrator into its collaborators.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().expect("journal lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("journal lock").clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|recorded| recorded == entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }
}

/// Service whose accept loop is a wait on a condition variable.
#[derive(Debug)]
pub struct FakeService {
    journal: Journal,
    serve_error: Mutex<Option<String>>,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl FakeService {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            serve_error: Mutex::new(None),
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    /// Makes `serve` fail immediately with `message`.
    pub fn failing_with(self, message: &str) -> Self {
        *self.serve_error.lock().expect("serve error lock") = Some(message.to_owned());
        self
    }
}

impl Service for FakeService {
    fn bind(&self) -> Result<(), ServiceError> {
        self.journal.record("bind");
        Ok(())
    }

    fn serve(&self, _events: &EventSender) -> Result<(), ServiceError> {
        self.journal.record("serve");
        if let Some(message) = self.serve_error.lock().expect("serve error lock").take() {
            return Err(ServiceError::Other(Box::new(io::Error::other(message))));
        }
        let stopped = self.stopped.lock().expect("stopped lock");
        drop(
            self.wake
                .wait_while(stopped, |stopped| !*stopped)
                .expect("stopped lock"),
        );
        Ok(())
    }

    fn stop_listening(&self) {
        self.journal.record("stop_listening");
        *self.stopped.lock().expect("stopped lock") = true;
        self.wake.notify_all();
    }
}

/// Discovery store that journals every call and always succeeds.
#[derive(Debug)]
pub struct RecordingStore {
    journal: Journal,
}

impl RecordingStore {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl DiscoveryStore for RecordingStore {
    fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), DiscoveryError> {
        self.journal.record("set");
        Ok(())
    }

    fn delete(&self, _key: &str) -> Result<(), DiscoveryError> {
        self.journal.record("delete");
        Ok(())
    }
}

/// Configuration with a fixed hostname and short timings.
pub fn test_config() -> Config {
    Config {
        hostname: Some("test-host".to_owned()),
        web_addr: "127.0.0.1:0".to_owned(),
        metrics_interval_ms: 20,
        etcd_heartbeat_ttl: 1,
        shutdown_drain_timeout_secs: 2,
        influxdb_password: Some("hunter2".to_owned()),
        ..Config::default()
    }
}

/// Collaborators writing events to `buffer`, with no sinks, no signal
/// watcher, and a spawner that must not be called.
pub fn collaborators(
    buffer: &SharedBuffer,
    discovery: Option<Arc<dyn DiscoveryStore>>,
) -> Collaborators {
    let mut spawner = MockProcessSpawner::new();
    spawner.expect_spawn().never();
    Collaborators {
        event_writer: EventWriter::from_writer(Box::new(buffer.clone()), false),
        discovery,
        sinks: Vec::new(),
        spawner: Box::new(spawner),
        argv: vec![OsString::from("/usr/local/bin/webtermd")],
        watch_signals: false,
    }
}

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    condition()
}

/// Runs `client` on a background thread and waits until it is serving.
pub fn start(
    client: &WorkClient,
) -> thread::JoinHandle<Result<(), crate::lifecycle::LifecycleError>> {
    let runner = client.clone();
    let handle = thread::spawn(move || runner.run());
    assert!(
        wait_until(|| client.state() == LifecycleState::Running),
        "client never reached running"
    );
    handle
}
