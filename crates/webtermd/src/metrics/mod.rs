//! Runtime metrics: a namespaced registry, a periodic sampler of the
//! process's resource usage, and push sinks (statsd, graphite, InfluxDB,
//! stderr).

mod registry;
mod runtime;
mod sampler;
mod sinks;

use std::io;

use thiserror::Error;

pub use registry::{Gauge, MetricKind, MetricRegistry, MetricValue, Reading, Timer, TimerStats};
pub use runtime::{RuntimeSnapshot, capture};
pub use sampler::{MetricsSampler, RUNTIME_GAUGES, RUNTIME_TIMERS, Rates, RuntimeMetrics};
pub use sinks::{
    DumpSink, GRAPHITE_INTERVAL, GraphiteSink, INFLUX_INTERVAL, InfluxSink, MetricBatch,
    MetricSink, STDERR_INTERVAL, ScheduledSink, StatsdSink, render_dump, render_graphite,
    render_influx, render_statsd, sinks_from_config,
};

pub(crate) const METRICS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::metrics");

/// Errors raised while registering or sampling metrics.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric name was blank.
    #[error("metric names must not be empty")]
    EmptyName,
    /// The name is already registered as a different kind.
    #[error("metric '{name}' is already registered as a {registered}")]
    KindMismatch {
        /// Fully qualified name.
        name: String,
        /// Kind already registered.
        registered: MetricKind,
    },
    /// Reading resource usage failed.
    #[error("failed to read resource usage: {source}")]
    Usage {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A configured sink could not be set up.
    #[error("failed to set up {sink} sink: {source}")]
    Sink {
        /// Sink name.
        sink: &'static str,
        /// Underlying sink error.
        #[source]
        source: SinkError,
    },
}

/// Errors raised while pushing to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink address did not resolve.
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        /// Configured address.
        addr: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// The sink URL was invalid.
    #[error("invalid sink url {addr}: {source}")]
    Url {
        /// Configured address.
        addr: String,
        /// Underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// Socket or writer IO failed.
    #[error("sink io failed: {source}")]
    Io {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The HTTP request failed or returned an error status.
    #[error("sink request failed: {source}")]
    Http {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
}
