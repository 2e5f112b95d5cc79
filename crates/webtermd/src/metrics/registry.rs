//! Named gauges and timers shared between the sampler and services.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::MetricsError;

/// Kind of a registered metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Instantaneous integer value.
    Gauge,
    /// Distribution of recorded durations.
    Timer,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gauge => formatter.write_str("gauge"),
            Self::Timer => formatter.write_str("timer"),
        }
    }
}

/// Handle to a registered gauge. Clones update the same value.
#[derive(Debug, Clone)]
pub struct Gauge {
    name: Arc<str>,
    value: Arc<AtomicI64>,
}

impl Gauge {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            value: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Replaces the current value.
    pub fn update(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Fully qualified name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Aggregate of the durations recorded by a [`Timer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Number of recordings.
    pub count: u64,
    /// Sum of all recordings.
    pub sum: Duration,
    /// Smallest recording.
    pub min: Duration,
    /// Largest recording.
    pub max: Duration,
    /// Most recent recording.
    pub last: Duration,
}

impl TimerStats {
    fn record(&mut self, value: Duration) {
        if self.count == 0 || value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.count = self.count.saturating_add(1);
        self.sum = self.sum.saturating_add(value);
        self.last = value;
    }

    /// Average recording, zero when nothing was recorded.
    #[must_use]
    pub fn mean(&self) -> Duration {
        u32::try_from(self.count)
            .ok()
            .filter(|count| *count > 0)
            .map_or(Duration::ZERO, |count| self.sum / count)
    }
}

/// Handle to a registered timer. Clones record into the same distribution.
#[derive(Debug, Clone)]
pub struct Timer {
    name: Arc<str>,
    stats: Arc<Mutex<TimerStats>>,
}

impl Timer {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            stats: Arc::new(Mutex::new(TimerStats::default())),
        }
    }

    /// Adds one recording.
    pub fn record(&self, value: Duration) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(value);
    }

    /// Copy of the aggregate so far.
    #[must_use]
    pub fn stats(&self) -> TimerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fully qualified name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
enum Metric {
    Gauge(Gauge),
    Timer(Timer),
}

impl Metric {
    fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Timer(_) => MetricKind::Timer,
        }
    }
}

/// Value of one metric at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    /// Gauge value.
    Gauge(i64),
    /// Timer aggregate.
    Timer(TimerStats),
}

/// One named reading inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricValue {
    /// Fully qualified name.
    pub name: String,
    /// Value at snapshot time.
    pub reading: Reading,
}

/// Registry of metrics under one namespace.
///
/// Names are stored as `namespace.name`. Entries are never removed; asking
/// for an existing name returns a handle to the same metric.
#[derive(Debug)]
pub struct MetricRegistry {
    namespace: String,
    entries: Mutex<BTreeMap<String, Metric>>,
}

impl MetricRegistry {
    /// Creates an empty registry whose names start with `namespace.`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fully qualified name for `name`.
    #[must_use]
    pub fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{name}", self.namespace)
        }
    }

    /// Registers or returns the gauge called `name`.
    pub fn gauge(&self, name: &str) -> Result<Gauge, MetricsError> {
        match self.get_or_insert(name, MetricKind::Gauge)? {
            Metric::Gauge(gauge) => Ok(gauge),
            Metric::Timer(timer) => Err(mismatch(timer.name(), MetricKind::Timer)),
        }
    }

    /// Registers or returns the timer called `name`.
    pub fn timer(&self, name: &str) -> Result<Timer, MetricsError> {
        match self.get_or_insert(name, MetricKind::Timer)? {
            Metric::Timer(timer) => Ok(timer),
            Metric::Gauge(gauge) => Err(mismatch(gauge.name(), MetricKind::Gauge)),
        }
    }

    fn get_or_insert(&self, name: &str, kind: MetricKind) -> Result<Metric, MetricsError> {
        if name.trim().is_empty() {
            return Err(MetricsError::EmptyName);
        }
        let qualified = self.qualify(name);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let metric = entries.entry(qualified).or_insert_with_key(|key| match kind {
            MetricKind::Gauge => Metric::Gauge(Gauge::new(key)),
            MetricKind::Timer => Metric::Timer(Timer::new(key)),
        });
        Ok(metric.clone())
    }

    /// Current readings, ordered by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MetricValue> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, metric)| MetricValue {
                name: name.clone(),
                reading: match metric {
                    Metric::Gauge(gauge) => Reading::Gauge(gauge.value()),
                    Metric::Timer(timer) => Reading::Timer(timer.stats()),
                },
            })
            .collect()
    }

    /// Number of registered metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kind registered under `name`, if any.
    ///
    /// Accepts either the short name or the qualified name that
    /// [`MetricRegistry::snapshot`] reports.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&self.qualify(name))
            .or_else(|| entries.get(name))
            .map(Metric::kind)
    }
}

fn mismatch(name: &str, registered: MetricKind) -> MetricsError {
    MetricsError::KindMismatch {
        name: name.to_owned(),
        registered,
    }
}
