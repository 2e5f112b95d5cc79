//! The process-lifecycle orchestrator.

use std::backtrace::Backtrace;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, info, warn};

use webterm_config::Config;

use crate::events::{
    self, ConsumerHandle, EVENT_CHANNEL_CAPACITY, EventReceiver, EventSender, EventWriter, LogEvent,
};
use crate::heartbeat::{Announcement, DiscoveryStore, EtcdStore, HeartbeatPublisher, heartbeat_key};
use crate::metrics::{Gauge, MetricRegistry, MetricsSampler, ScheduledSink, Timer, sinks_from_config};
use crate::process::{
    ProcessSpawner, RestartCoordinator, RestartError, SignalHandler, SignalWatcher, SystemSpawner,
    system_hostname,
};

use super::errors::LifecycleError;
use super::service::Service;
use super::state::LifecycleState;
use super::LIFECYCLE_TARGET;

/// Replaceable collaborators of a [`WorkClient`].
///
/// [`Collaborators::from_config`] builds the production set; tests swap in
/// in-memory writers, mocked stores, and fake spawners.
pub struct Collaborators {
    /// Destination of the event log.
    pub event_writer: EventWriter,
    /// Discovery store for heartbeats; `None` disables the publisher.
    pub discovery: Option<Arc<dyn DiscoveryStore>>,
    /// Metrics sinks with their cadences.
    pub sinks: Vec<ScheduledSink>,
    /// Starts successor processes on restart.
    pub spawner: Box<dyn ProcessSpawner>,
    /// Argument vector a successor is derived from, program first.
    pub argv: Vec<OsString>,
    /// Whether to install the process signal watcher.
    pub watch_signals: bool,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Collaborators")
            .field("discovery", &self.discovery.is_some())
            .field("sinks", &self.sinks)
            .field("argv", &self.argv)
            .field("watch_signals", &self.watch_signals)
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Production collaborators for `config`.
    pub fn from_config(config: &Config) -> Result<Self, LifecycleError> {
        let event_writer = EventWriter::open(&config.log_destination())
            .map_err(|source| LifecycleError::EventSink { source })?;
        let discovery = EtcdStore::from_config(config)?
            .map(|store| Arc::new(store) as Arc<dyn DiscoveryStore>);
        Ok(Self {
            event_writer,
            discovery,
            sinks: sinks_from_config(config)?,
            spawner: Box::new(SystemSpawner),
            argv: env::args_os().collect(),
            watch_signals: true,
        })
    }
}

struct Task {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl Task {
    fn stop(self, name: &'static str) {
        drop(self.stop);
        if self.thread.join().is_err() {
            warn!(target: LIFECYCLE_TARGET, task = name, "task panicked before stopping");
        }
    }
}

/// Resources handed from `configure` to `run`.
struct Pending {
    receiver: EventReceiver,
    writer: EventWriter,
    sampler: MetricsSampler,
    discovery: Option<Arc<dyn DiscoveryStore>>,
    watch_signals: bool,
}

#[derive(Default)]
struct Tasks {
    consumer: Option<ConsumerHandle>,
    metrics: Option<Task>,
    heartbeat: Option<Task>,
    signals: Option<SignalWatcher>,
}

#[derive(Default)]
struct Quit {
    fired: Mutex<bool>,
    signal: Condvar,
}

impl Quit {
    fn fire(&self) {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    fn wait(&self) {
        let fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        drop(
            self.signal
                .wait_while(fired, |fired| !*fired)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }
}

struct Inner {
    config: Config,
    hostname: String,
    pid: u32,
    announcement: String,
    heartbeat_key: String,
    service: Arc<dyn Service>,
    events: EventSender,
    registry: Arc<MetricRegistry>,
    restart: RestartCoordinator<Box<dyn ProcessSpawner>>,
    state: Mutex<LifecycleState>,
    pending: Mutex<Option<Pending>>,
    tasks: Mutex<Tasks>,
    quit: Quit,
}

impl Inner {
    fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Moves `from → to` atomically, or reports the state that blocked it.
    fn transition(
        &self,
        operation: &'static str,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(LifecycleError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) -> Result<(), LifecycleError> {
        self.transition("close", LifecycleState::Running, LifecycleState::Draining)?;
        info!(target: LIFECYCLE_TARGET, "closing");
        self.service.stop_listening();

        let tasks = std::mem::take(&mut *self.tasks());
        if let Some(signals) = &tasks.signals {
            signals.stop();
        }
        if let Some(task) = tasks.metrics {
            task.stop("metrics");
        }
        if let Some(task) = tasks.heartbeat {
            task.stop("heartbeat");
        }

        self.events.close();
        if let Some(consumer) = tasks.consumer {
            let timeout = self.config.drain_timeout();
            match consumer.wait_drained(timeout) {
                Ok(()) => debug!(target: LIFECYCLE_TARGET, "event log drained"),
                Err(error) => warn!(
                    target: LIFECYCLE_TARGET,
                    error = %error,
                    "event log drain incomplete; quitting anyway"
                ),
            }
        }

        self.set_state(LifecycleState::Closed);
        self.quit.fire();
        Ok(())
    }

    fn restart(&self) -> Result<u32, LifecycleError> {
        let state = self.state();
        if state != LifecycleState::Running {
            return Err(LifecycleError::InvalidState {
                operation: "restart",
                state,
            });
        }
        let listener = self.service.listener().ok_or(RestartError::NoListener)?;
        Ok(self.restart.restart(&listener)?)
    }
}

struct SignalBridge {
    inner: Arc<Inner>,
}

impl SignalHandler for SignalBridge {
    fn restart(&self) {
        let events = &self.inner.events;
        events.info("initiated graceful restart");
        match self.inner.restart() {
            Ok(pid) => {
                events.info(format!("started successor with pid {pid}"));
            }
            Err(error) => {
                events.error("graceful restart failed", &error);
            }
        }
    }

    fn shutdown(&self) {
        if let Err(error) = self.inner.close() {
            debug!(target: LIFECYCLE_TARGET, error = %error, "shutdown signal ignored");
        }
    }
}

/// Runs one service generation: event log, metrics, heartbeat, signals,
/// and the orderly drain on close.
///
/// Constructed configured; [`run`](Self::run) blocks until
/// [`close`](Self::close) completes.
#[derive(Clone)]
pub struct WorkClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for WorkClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WorkClient")
            .field("service_name", &self.inner.config.service_name)
            .field("hostname", &self.inner.hostname)
            .field("pid", &self.inner.pid)
            .field("state", &self.inner.state())
            .finish_non_exhaustive()
    }
}

/// Cloneable handle that closes a [`WorkClient`] from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ShutdownHandle")
            .field("state", &self.inner.state())
            .finish()
    }
}

impl ShutdownHandle {
    /// Same as [`WorkClient::close`].
    pub fn close(&self) -> Result<(), LifecycleError> {
        self.inner.close()
    }
}

impl WorkClient {
    /// Configures a client with production collaborators.
    pub fn configure(config: Config, service: Arc<dyn Service>) -> Result<Self, LifecycleError> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::configure_with(config, service, collaborators)
    }

    /// Configures a client with explicit collaborators.
    ///
    /// Resolves the hostname (configured value, then `HOSTNAME`, then the
    /// kernel) and serialises the heartbeat announcement up front so neither
    /// can fail later.
    pub fn configure_with(
        config: Config,
        service: Arc<dyn Service>,
        collaborators: Collaborators,
    ) -> Result<Self, LifecycleError> {
        let hostname = system_hostname(config.hostname_override())?;
        let config = config.with_hostname(hostname.clone());
        let pid = std::process::id();
        let announcement = Announcement::new(pid, &config).to_json()?;
        let heartbeat_key = heartbeat_key(&config.etcd_prefix_key, &config.service_name, &hostname, pid);

        let (events, receiver) = events::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(MetricRegistry::new(config.service_name.clone()));
        let sampler = MetricsSampler::new(
            Arc::clone(&registry),
            collaborators.sinks,
            config.metrics_interval(),
            Instant::now(),
        )?;
        debug!(
            target: LIFECYCLE_TARGET,
            service = %config.service_name,
            hostname = %hostname,
            pid,
            "configured"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                hostname,
                pid,
                announcement,
                heartbeat_key,
                service,
                events,
                registry,
                restart: RestartCoordinator::with_spawner(collaborators.argv, collaborators.spawner),
                state: Mutex::new(LifecycleState::Configured),
                pending: Mutex::new(Some(Pending {
                    receiver,
                    writer: collaborators.event_writer,
                    sampler,
                    discovery: collaborators.discovery,
                    watch_signals: collaborators.watch_signals,
                })),
                tasks: Mutex::new(Tasks::default()),
                quit: Quit::default(),
                config,
            }),
        })
    }

    /// Binds the service, starts the background tasks, and serves until
    /// [`close`](Self::close) finishes.
    ///
    /// A bind failure is written straight to the event sink and returned
    /// without starting anything. A serve failure is logged and triggers
    /// `close` before being returned.
    pub fn run(&self) -> Result<(), LifecycleError> {
        let inner = &self.inner;
        let pending = {
            let state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != LifecycleState::Configured {
                return Err(LifecycleError::InvalidState {
                    operation: "run",
                    state: *state,
                });
            }
            inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or(LifecycleError::InvalidState {
                    operation: "run",
                    state: *state,
                })?
        };

        let Pending {
            receiver,
            mut writer,
            sampler,
            discovery,
            watch_signals,
        } = pending;

        if let Err(source) = inner.service.bind() {
            let event = LogEvent::error("failed to bind service socket", &source);
            if let Err(error) = writer.write_event(&event).and_then(|()| writer.flush()) {
                warn!(target: LIFECYCLE_TARGET, error = %error, "failed to report bind error");
            }
            self.abandon();
            return Err(LifecycleError::Bind { source });
        }

        // Held until every task is registered so a concurrent close sees
        // all of them.
        let mut tasks = inner.tasks();
        match receiver.spawn(writer) {
            Ok(consumer) => tasks.consumer = Some(consumer),
            Err(source) => {
                drop(tasks);
                inner.service.stop_listening();
                self.abandon();
                return Err(LifecycleError::Spawn {
                    task: "event-log",
                    source,
                });
            }
        }
        inner.set_state(LifecycleState::Running);
        self.start_background(&mut tasks, sampler, discovery, watch_signals);
        drop(tasks);

        inner.events.info(format!(
            "{} {} started with pid {}",
            inner.config.service_name,
            env!("CARGO_PKG_VERSION"),
            inner.pid
        ));

        let outcome = inner.service.serve(&inner.events);
        let result = match outcome {
            Ok(()) => {
                if inner.state() == LifecycleState::Running {
                    debug!(target: LIFECYCLE_TARGET, "service returned on its own");
                    self.close_quietly();
                }
                Ok(())
            }
            Err(source) if inner.state() == LifecycleState::Running => {
                let event = LogEvent::error("service stopped unexpectedly", &source)
                    .with_stack(Backtrace::force_capture().to_string());
                inner.events.send(event);
                self.close_quietly();
                Err(LifecycleError::Serve { source })
            }
            Err(source) => {
                debug!(target: LIFECYCLE_TARGET, error = %source, "serve error during shutdown");
                Ok(())
            }
        };
        inner.quit.wait();
        result
    }

    fn abandon(&self) {
        self.inner.set_state(LifecycleState::Closed);
        self.inner.events.close();
        self.inner.quit.fire();
    }

    fn close_quietly(&self) {
        if let Err(error) = self.inner.close() {
            debug!(target: LIFECYCLE_TARGET, error = %error, "close already in progress");
        }
    }

    fn start_background(
        &self,
        tasks: &mut Tasks,
        sampler: MetricsSampler,
        discovery: Option<Arc<dyn DiscoveryStore>>,
        watch_signals: bool,
    ) {
        let inner = &self.inner;
        let events = &inner.events;

        let (stop, stopped) = mpsc::channel();
        match sampler.spawn(events.clone(), stopped) {
            Ok(thread) => tasks.metrics = Some(Task { stop, thread }),
            Err(error) => {
                events.error("failed to start metrics sampler", &error);
            }
        }

        if let Some(store) = discovery {
            let publisher = HeartbeatPublisher::new(
                store,
                inner.heartbeat_key.clone(),
                inner.announcement.clone(),
                inner.config.heartbeat_interval(),
            );
            let (stop, stopped) = mpsc::channel();
            match publisher.spawn(events.clone(), stopped) {
                Ok(thread) => tasks.heartbeat = Some(Task { stop, thread }),
                Err(error) => {
                    events.error("failed to start heartbeat", &error);
                }
            }
        }

        if watch_signals {
            match SignalWatcher::spawn(self.signal_handler()) {
                Ok(watcher) => tasks.signals = Some(watcher),
                Err(error) => {
                    events.error("failed to watch process signals", &error);
                }
            }
        }
    }

    /// Stops listening, stops the metrics and heartbeat tasks, drains the
    /// event log (bounded by the configured drain timeout), and releases
    /// [`run`](Self::run).
    ///
    /// Only valid while running; any other state, including a second close,
    /// is an [`InvalidState`](LifecycleError::InvalidState) error.
    pub fn close(&self) -> Result<(), LifecycleError> {
        self.inner.close()
    }

    /// Handler that turns SIGHUP into a logged restart and termination
    /// signals into a close.
    pub(crate) fn signal_handler(&self) -> Arc<dyn SignalHandler> {
        Arc::new(SignalBridge {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Hands the listener to a freshly started successor and returns its pid.
    ///
    /// This generation keeps serving until it is told to close, normally by
    /// the successor once it is ready.
    pub fn restart(&self) -> Result<u32, LifecycleError> {
        self.inner.restart()
    }

    /// Registers (or returns) the gauge `service_name.name`.
    pub fn new_gauge(&self, name: &str) -> Result<Gauge, LifecycleError> {
        Ok(self.inner.registry.gauge(name)?)
    }

    /// Registers (or returns) the timer `service_name.name`.
    pub fn new_timer(&self, name: &str) -> Result<Timer, LifecycleError> {
        Ok(self.inner.registry.timer(name)?)
    }

    /// Producer handle for the event log.
    #[must_use]
    pub fn events(&self) -> EventSender {
        self.inner.events.clone()
    }

    /// Handle that can close this client from another thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Effective configuration, hostname resolved.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Resolved hostname.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    /// JSON announcement published by the heartbeat.
    #[must_use]
    pub fn announcement(&self) -> &str {
        &self.inner.announcement
    }

    /// Discovery key used by the heartbeat.
    #[must_use]
    pub fn heartbeat_key(&self) -> &str {
        &self.inner.heartbeat_key
    }

    /// Registry holding the runtime and service metrics.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.inner.registry
    }
}
