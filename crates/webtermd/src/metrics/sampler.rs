//! Periodic runtime sampling and sink fan-out.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::events::EventSender;

use super::registry::{Gauge, MetricRegistry, Timer};
use super::runtime::{RuntimeSnapshot, capture};
use super::sinks::{MetricBatch, ScheduledSink};
use super::{METRICS_TARGET, MetricsError};

/// Gauges refreshed from every snapshot.
pub const RUNTIME_GAUGES: [&str; 12] = [
    "cpu_num",
    "thread_num",
    "memory_resident",
    "memory_virtual",
    "memory_peak_resident",
    "memory_data",
    "memory_stack",
    "fd_num",
    "minor_faults",
    "major_faults",
    "ctx_switches",
    "cpu_time_ms",
];

/// Rate timers derived from consecutive snapshots. Values are recorded as
/// milliseconds, so a rate of `n` per second reads as `n` ms.
pub const RUNTIME_TIMERS: [&str; 2] = ["cpu_ms_per_second", "faults_per_second"];

#[derive(Debug, Clone, Copy)]
struct Previous {
    at: Instant,
    cpu_time: Duration,
    faults: i64,
}

/// Rates computed by one [`RuntimeMetrics::apply`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rates {
    /// CPU milliseconds consumed per wall-clock second.
    pub cpu_ms_per_second: u64,
    /// Page faults (minor and major) per wall-clock second.
    pub faults_per_second: u64,
}

/// The fixed runtime gauge and timer set, plus the state carried between
/// ticks to derive rates.
#[derive(Debug)]
pub struct RuntimeMetrics {
    gauges: Vec<Gauge>,
    cpu_rate: Timer,
    fault_rate: Timer,
    previous: Mutex<Option<Previous>>,
}

fn per_second(delta: u128, elapsed: Duration) -> u64 {
    let micros = elapsed.as_micros();
    if micros == 0 {
        return 0;
    }
    u64::try_from(delta.saturating_mul(1_000_000) / micros).unwrap_or(u64::MAX)
}

impl RuntimeMetrics {
    /// Registers the runtime metrics in `registry`.
    pub fn register(registry: &MetricRegistry) -> Result<Self, MetricsError> {
        let gauges = RUNTIME_GAUGES
            .iter()
            .map(|name| registry.gauge(name))
            .collect::<Result<Vec<_>, _>>()?;
        let [cpu_rate, fault_rate] = RUNTIME_TIMERS;
        Ok(Self {
            gauges,
            cpu_rate: registry.timer(cpu_rate)?,
            fault_rate: registry.timer(fault_rate)?,
            previous: Mutex::new(None),
        })
    }

    /// Updates every runtime metric from `snapshot`, taken at `now`.
    ///
    /// The first call only seeds the rate state. Counters that move backwards
    /// yield a zero rate.
    pub fn apply(&self, snapshot: &RuntimeSnapshot, now: Instant) -> Option<Rates> {
        let cpu_time_ms = i64::try_from(snapshot.cpu_time.as_millis()).unwrap_or(i64::MAX);
        let values = [
            snapshot.cpu_num,
            snapshot.thread_num,
            snapshot.memory_resident,
            snapshot.memory_virtual,
            snapshot.memory_peak_resident,
            snapshot.memory_data,
            snapshot.memory_stack,
            snapshot.fd_num,
            snapshot.minor_faults,
            snapshot.major_faults,
            snapshot.ctx_switches,
            cpu_time_ms,
        ];
        for (gauge, value) in self.gauges.iter().zip(values) {
            gauge.update(value);
        }

        let faults = snapshot.minor_faults.saturating_add(snapshot.major_faults);
        let current = Previous {
            at: now,
            cpu_time: snapshot.cpu_time,
            faults,
        };
        let previous = self
            .previous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(current)?;

        let elapsed = now.saturating_duration_since(previous.at);
        let cpu_delta = snapshot.cpu_time.saturating_sub(previous.cpu_time);
        let fault_delta = u128::try_from(faults.saturating_sub(previous.faults)).unwrap_or(0);
        let rates = Rates {
            cpu_ms_per_second: per_second(cpu_delta.as_millis(), elapsed),
            faults_per_second: per_second(fault_delta, elapsed),
        };
        self.cpu_rate
            .record(Duration::from_millis(rates.cpu_ms_per_second));
        self.fault_rate
            .record(Duration::from_millis(rates.faults_per_second));
        Some(rates)
    }
}

struct Scheduled {
    inner: ScheduledSink,
    next_due: Instant,
}

/// Samples the process on a fixed tick and pushes the registry to sinks.
pub struct MetricsSampler {
    registry: Arc<MetricRegistry>,
    runtime: RuntimeMetrics,
    sinks: Vec<Scheduled>,
    interval: Duration,
}

impl std::fmt::Debug for MetricsSampler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MetricsSampler")
            .field("interval", &self.interval)
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl MetricsSampler {
    /// Builds a sampler ticking every `interval`. Each sink first fires one
    /// cadence after `start`.
    pub fn new(
        registry: Arc<MetricRegistry>,
        sinks: Vec<ScheduledSink>,
        interval: Duration,
        start: Instant,
    ) -> Result<Self, MetricsError> {
        let runtime = RuntimeMetrics::register(&registry)?;
        let sinks = sinks
            .into_iter()
            .map(|inner| Scheduled {
                next_due: start + inner.every,
                inner,
            })
            .collect();
        Ok(Self {
            registry,
            runtime,
            sinks,
            interval: interval.max(Duration::from_millis(1)),
        })
    }

    /// Runs one tick: snapshot, update, and push to every due sink.
    pub fn tick(&mut self, now: Instant, events: &EventSender) {
        match capture() {
            Ok(snapshot) => {
                self.runtime.apply(&snapshot, now);
            }
            Err(error) => {
                events.error("failed to sample process metrics", &error);
                return;
            }
        }
        let batch = MetricBatch {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_secs()),
            values: self.registry.snapshot(),
        };
        self.push_due(now, &batch, events);
    }

    fn push_due(&mut self, now: Instant, batch: &MetricBatch, events: &EventSender) {
        for scheduled in &mut self.sinks {
            if now < scheduled.next_due {
                continue;
            }
            scheduled.next_due = now + scheduled.inner.every;
            let sink = &mut scheduled.inner.sink;
            match sink.publish(batch) {
                Ok(()) => trace!(target: METRICS_TARGET, sink = sink.name(), "metrics pushed"),
                Err(error) => {
                    events.error(format!("failed to push metrics to {}", sink.name()), &error);
                }
            }
        }
    }

    /// Runs the sampler on its own thread until `stop` fires or disconnects.
    pub fn spawn(
        mut self,
        events: EventSender,
        stop: Receiver<()>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("metrics-sampler".to_owned())
            .spawn(move || {
                loop {
                    match stop.recv_timeout(self.interval) {
                        Err(RecvTimeoutError::Timeout) => self.tick(Instant::now(), &events),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(target: METRICS_TARGET, "metrics sampler stopped");
            })
    }
}
