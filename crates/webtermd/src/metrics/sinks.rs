//! Destinations the sampler pushes registry snapshots to.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use reqwest::blocking::Client;
use url::Url;

use webterm_config::Config;

use super::registry::{MetricValue, Reading, TimerStats};
use super::{MetricsError, SinkError};

/// Cadence of the graphite push.
pub const GRAPHITE_INTERVAL: Duration = Duration::from_secs(10);
/// Cadence of the InfluxDB push.
pub const INFLUX_INTERVAL: Duration = Duration::from_secs(10);
/// Cadence of the stderr dump.
pub const STDERR_INTERVAL: Duration = Duration::from_secs(30);

const NETWORK_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry contents handed to sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricBatch {
    /// Seconds since the Unix epoch when the batch was taken.
    pub timestamp: u64,
    /// Readings ordered by name.
    pub values: Vec<MetricValue>,
}

/// A metrics destination.
pub trait MetricSink: Send {
    /// Short name used in error events.
    fn name(&self) -> &'static str;
    /// Pushes one batch.
    fn publish(&mut self, batch: &MetricBatch) -> Result<(), SinkError>;
}

fn millis(value: Duration) -> u128 {
    value.as_millis()
}

fn resolve(addr: &str) -> Result<std::net::SocketAddr, SinkError> {
    addr.to_socket_addrs()
        .map_err(|source| SinkError::Resolve {
            addr: addr.to_owned(),
            source,
        })?
        .next()
        .ok_or_else(|| SinkError::Resolve {
            addr: addr.to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        })
}

/// Renders statsd lines: gauges as `|g`, timers as their last value in `|ms`.
#[must_use]
pub fn render_statsd(prefix: &str, batch: &MetricBatch) -> Vec<String> {
    batch
        .values
        .iter()
        .filter_map(|value| match value.reading {
            Reading::Gauge(current) => Some(format!("{prefix}{}:{current}|g", value.name)),
            Reading::Timer(stats) if stats.count > 0 => {
                Some(format!("{prefix}{}:{}|ms", value.name, millis(stats.last)))
            }
            Reading::Timer(_) => None,
        })
        .collect()
}

/// statsd over UDP, one datagram per line.
#[derive(Debug)]
pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdSink {
    /// Connects a UDP socket to `addr`.
    pub fn connect(addr: &str, prefix: impl Into<String>) -> Result<Self, SinkError> {
        let target = resolve(addr)?;
        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).map_err(|source| SinkError::Io { source })?;
        socket
            .connect(target)
            .map_err(|source| SinkError::Io { source })?;
        Ok(Self {
            socket,
            prefix: prefix.into(),
        })
    }
}

impl MetricSink for StatsdSink {
    fn name(&self) -> &'static str {
        "statsd"
    }

    fn publish(&mut self, batch: &MetricBatch) -> Result<(), SinkError> {
        for line in render_statsd(&self.prefix, batch) {
            self.socket
                .send(line.as_bytes())
                .map_err(|source| SinkError::Io { source })?;
        }
        Ok(())
    }
}

/// Renders graphite plaintext lines. Timers expand into
/// `.count`, `.min`, `.max`, `.mean`, and `.last` (milliseconds).
#[must_use]
pub fn render_graphite(prefix: &str, batch: &MetricBatch) -> String {
    let mut out = String::new();
    let ts = batch.timestamp;
    for value in &batch.values {
        let name = &value.name;
        match value.reading {
            Reading::Gauge(current) => {
                let _ = writeln!(out, "{prefix}{name} {current} {ts}");
            }
            Reading::Timer(stats) => {
                let _ = writeln!(out, "{prefix}{name}.count {} {ts}", stats.count);
                for (field, amount) in timer_fields(&stats) {
                    let _ = writeln!(out, "{prefix}{name}.{field} {} {ts}", millis(amount));
                }
            }
        }
    }
    out
}

fn timer_fields(stats: &TimerStats) -> [(&'static str, Duration); 4] {
    [
        ("min", stats.min),
        ("max", stats.max),
        ("mean", stats.mean()),
        ("last", stats.last),
    ]
}

/// graphite plaintext protocol over a fresh TCP connection per push.
#[derive(Debug)]
pub struct GraphiteSink {
    addr: String,
    prefix: String,
}

impl GraphiteSink {
    /// Sink pushing to `addr`.
    pub fn new(addr: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            prefix: prefix.into(),
        }
    }
}

impl MetricSink for GraphiteSink {
    fn name(&self) -> &'static str {
        "graphite"
    }

    fn publish(&mut self, batch: &MetricBatch) -> Result<(), SinkError> {
        let target = resolve(&self.addr)?;
        let mut stream = TcpStream::connect_timeout(&target, NETWORK_TIMEOUT)
            .map_err(|source| SinkError::Io { source })?;
        stream
            .set_write_timeout(Some(NETWORK_TIMEOUT))
            .map_err(|source| SinkError::Io { source })?;
        stream
            .write_all(render_graphite(&self.prefix, batch).as_bytes())
            .map_err(|source| SinkError::Io { source })
    }
}

fn escape_measurement(name: &str) -> String {
    name.replace(',', "\\,").replace(' ', "\\ ")
}

/// Renders InfluxDB line protocol with nanosecond timestamps.
#[must_use]
pub fn render_influx(batch: &MetricBatch) -> String {
    let mut out = String::new();
    let ts = u128::from(batch.timestamp) * 1_000_000_000;
    for value in &batch.values {
        let measurement = escape_measurement(&value.name);
        match value.reading {
            Reading::Gauge(current) => {
                let _ = writeln!(out, "{measurement} value={current}i {ts}");
            }
            Reading::Timer(stats) => {
                let _ = write!(out, "{measurement} count={}i", stats.count);
                for (field, amount) in timer_fields(&stats) {
                    let _ = write!(out, ",{field}={}i", millis(amount));
                }
                let _ = writeln!(out, " {ts}");
            }
        }
    }
    out
}

/// InfluxDB HTTP write endpoint.
#[derive(Debug)]
pub struct InfluxSink {
    client: Client,
    url: Url,
}

impl InfluxSink {
    /// Builds the write URL for `addr` and `database`, with optional
    /// credentials passed as query parameters.
    pub fn new(
        addr: &str,
        database: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, SinkError> {
        let mut url = Url::parse(addr)
            .and_then(|base| base.join("write"))
            .map_err(|source| SinkError::Url {
                addr: addr.to_owned(),
                source,
            })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("db", database);
            if let Some(username) = username {
                query.append_pair("u", username);
            }
            if let Some(password) = password {
                query.append_pair("p", password);
            }
        }
        let client = Client::builder()
            .timeout(NETWORK_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|source| SinkError::Http { source })?;
        Ok(Self { client, url })
    }

    /// Target URL, credentials included.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl MetricSink for InfluxSink {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    fn publish(&mut self, batch: &MetricBatch) -> Result<(), SinkError> {
        self.client
            .post(self.url.clone())
            .body(render_influx(batch))
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map(drop)
            .map_err(|source| SinkError::Http { source })
    }
}

/// Renders the human-readable dump, one `metrics:` line per metric.
#[must_use]
pub fn render_dump(batch: &MetricBatch) -> String {
    let mut out = String::new();
    for value in &batch.values {
        match value.reading {
            Reading::Gauge(current) => {
                let _ = writeln!(out, "metrics: gauge {} value={current}", value.name);
            }
            Reading::Timer(stats) => {
                let _ = write!(out, "metrics: timer {} count={}", value.name, stats.count);
                for (field, amount) in timer_fields(&stats) {
                    let _ = write!(out, " {field}={}ms", millis(amount));
                }
                out.push('\n');
            }
        }
    }
    out
}

/// Periodic dump to a writer, stderr in production.
pub struct DumpSink {
    writer: Box<dyn Write + Send>,
}

impl std::fmt::Debug for DumpSink {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("DumpSink").finish_non_exhaustive()
    }
}

impl DumpSink {
    /// Dumps to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(io::stderr()))
    }

    /// Dumps to `writer`.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }
}

impl MetricSink for DumpSink {
    fn name(&self) -> &'static str {
        "stderr"
    }

    fn publish(&mut self, batch: &MetricBatch) -> Result<(), SinkError> {
        self.writer
            .write_all(render_dump(batch).as_bytes())
            .and_then(|()| self.writer.flush())
            .map_err(|source| SinkError::Io { source })
    }
}

/// A sink with the cadence it is pushed at.
pub struct ScheduledSink {
    /// Destination.
    pub sink: Box<dyn MetricSink>,
    /// Push cadence.
    pub every: Duration,
}

impl std::fmt::Debug for ScheduledSink {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ScheduledSink")
            .field("sink", &self.sink.name())
            .field("every", &self.every)
            .finish()
    }
}

/// Builds every sink the configuration enables.
pub fn sinks_from_config(config: &Config) -> Result<Vec<ScheduledSink>, MetricsError> {
    let mut sinks = Vec::new();
    let configured = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };
    if let Some(addr) = configured(&config.statsd_addr) {
        let sink = StatsdSink::connect(&addr, config.statsd_prefix.clone())
            .map_err(|source| MetricsError::Sink { sink: "statsd", source })?;
        sinks.push(ScheduledSink {
            sink: Box::new(sink),
            every: config.statsd_flush_interval(),
        });
    }
    if let Some(addr) = configured(&config.graphite_addr) {
        sinks.push(ScheduledSink {
            sink: Box::new(GraphiteSink::new(addr, config.graphite_prefix.clone())),
            every: GRAPHITE_INTERVAL,
        });
    }
    if let Some(addr) = configured(&config.influxdb_addr) {
        let database = configured(&config.influxdb_service_metrics_db)
            .unwrap_or_else(|| config.service_name.clone());
        let sink = InfluxSink::new(
            &addr,
            &database,
            config.influxdb_username.as_deref(),
            config.influxdb_password.as_deref(),
        )
        .map_err(|source| MetricsError::Sink {
            sink: "influxdb",
            source,
        })?;
        sinks.push(ScheduledSink {
            sink: Box::new(sink),
            every: INFLUX_INTERVAL,
        });
    }
    if config.stderr_metrics {
        sinks.push(ScheduledSink {
            sink: Box::new(DumpSink::stderr()),
            every: STDERR_INTERVAL,
        });
    }
    Ok(sinks)
}
