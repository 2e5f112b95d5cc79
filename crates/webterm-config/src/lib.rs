//! Shared configuration for the webterm service harness.
//!
//! [`Config`] is loaded once at process start from, in increasing precedence,
//! built-in defaults, a TOML file named by `--config-path` or
//! `WEBTERM_CONFIG_PATH`, `WEBTERM_*` environment variables, and command-line
//! flags. The daemon treats the loaded value as immutable for the lifetime of
//! the process.

mod defaults;
mod logging;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_DRAIN_TIMEOUT_SECS, DEFAULT_ETCD_PREFIX_KEY, DEFAULT_GRAPHITE_PREFIX,
    DEFAULT_HEARTBEAT_TTL_SECS, DEFAULT_LOG_FILTER, DEFAULT_MAX_HEADER_BYTES,
    DEFAULT_METRICS_INTERVAL_MS, DEFAULT_SERVICE_NAME, DEFAULT_STATSD_INTERVAL_SECS,
    DEFAULT_STATSD_PREFIX, DEFAULT_WEB_ADDR, DEFAULT_WEB_TIMEOUT_SECS, default_log_filter,
    default_log_format,
};
pub use logging::{DISCARD_LOG_PATH, LogDestination, LogFormat, LogFormatParseError};

/// Effective configuration of one harness process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "WEBTERM")]
pub struct Config {
    /// Name the service registers under in metrics and discovery.
    #[serde(default = "defaults::service_name")]
    pub service_name: String,
    /// Hostname override used when the OS hostname is unsuitable.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Address the service listener binds to.
    #[serde(default = "defaults::web_addr")]
    pub web_addr: String,
    /// Per-connection read timeout in seconds.
    #[serde(default = "defaults::web_timeout_secs")]
    pub web_read_timeout_secs: u64,
    /// Per-connection write timeout in seconds.
    #[serde(default = "defaults::web_timeout_secs")]
    pub web_write_timeout_secs: u64,
    /// Largest request header a connection may send.
    #[serde(default = "defaults::max_header_bytes")]
    pub web_max_header_bytes: usize,
    /// Destination of the event log; unset means standard error.
    #[serde(default)]
    pub stderr_logfile: Option<String>,
    /// Periodically dumps every metric to standard error.
    #[serde(default)]
    pub stderr_metrics: bool,
    /// statsd endpoint (`host:port`, UDP).
    #[serde(default)]
    pub statsd_addr: Option<String>,
    /// Flush interval for statsd in seconds.
    #[serde(default = "defaults::statsd_interval_secs")]
    pub statsd_interval: u64,
    /// Prefix prepended to every statsd metric name.
    #[serde(default = "defaults::statsd_prefix")]
    pub statsd_prefix: String,
    /// Graphite plaintext endpoint (`host:port`, TCP).
    #[serde(default)]
    pub graphite_addr: Option<String>,
    /// Prefix prepended to every graphite metric path.
    #[serde(default = "defaults::graphite_prefix")]
    pub graphite_prefix: String,
    /// InfluxDB base URL, e.g. `http://localhost:8086`.
    #[serde(default)]
    pub influxdb_addr: Option<String>,
    /// InfluxDB database receiving service metrics.
    #[serde(default)]
    pub influxdb_service_metrics_db: Option<String>,
    /// InfluxDB user name.
    #[serde(default)]
    pub influxdb_username: Option<String>,
    /// InfluxDB password.
    #[serde(default)]
    pub influxdb_password: Option<String>,
    /// etcd base URL used for the service heartbeat.
    #[serde(default)]
    pub etcd_addr: Option<String>,
    /// CA certificate (PEM path) trusted for etcd connections.
    #[serde(default)]
    pub etcd_cacert: Option<String>,
    /// Client key (PEM path) presented to etcd.
    #[serde(default)]
    pub etcd_tlskey: Option<String>,
    /// Client certificate (PEM path) presented to etcd.
    #[serde(default)]
    pub etcd_tlscert: Option<String>,
    /// Key prefix under which heartbeats are written.
    #[serde(default = "defaults::etcd_prefix_key")]
    pub etcd_prefix_key: String,
    /// Heartbeat interval and record TTL in seconds.
    #[serde(default = "defaults::heartbeat_ttl_secs")]
    pub etcd_heartbeat_ttl: u64,
    /// Runtime metrics sampling interval in milliseconds.
    #[serde(default = "defaults::metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    /// Upper bound on waiting for the event log to drain at shutdown; `0`
    /// waits until every event is written.
    #[serde(default = "defaults::drain_timeout_secs")]
    pub shutdown_drain_timeout_secs: u64,
    /// Successors terminate their predecessor once they accept connections.
    #[serde(default = "defaults::terminate_parent")]
    pub terminate_parent: bool,
    /// `tracing` filter expression for internal diagnostics.
    #[serde(default = "defaults::log_filter")]
    pub log_filter: String,
    /// Output format for internal diagnostics.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: defaults::service_name(),
            hostname: None,
            web_addr: defaults::web_addr(),
            web_read_timeout_secs: DEFAULT_WEB_TIMEOUT_SECS,
            web_write_timeout_secs: DEFAULT_WEB_TIMEOUT_SECS,
            web_max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            stderr_logfile: None,
            stderr_metrics: false,
            statsd_addr: None,
            statsd_interval: DEFAULT_STATSD_INTERVAL_SECS,
            statsd_prefix: defaults::statsd_prefix(),
            graphite_addr: None,
            graphite_prefix: defaults::graphite_prefix(),
            influxdb_addr: None,
            influxdb_service_metrics_db: None,
            influxdb_username: None,
            influxdb_password: None,
            etcd_addr: None,
            etcd_cacert: None,
            etcd_tlskey: None,
            etcd_tlscert: None,
            etcd_prefix_key: defaults::etcd_prefix_key(),
            etcd_heartbeat_ttl: DEFAULT_HEARTBEAT_TTL_SECS,
            metrics_interval_ms: DEFAULT_METRICS_INTERVAL_MS,
            shutdown_drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
            terminate_parent: true,
            log_filter: defaults::log_filter(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Read timeout applied to accepted connections.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.web_read_timeout_secs)
    }

    /// Write timeout applied to accepted connections.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.web_write_timeout_secs)
    }

    /// Interval between runtime metric samples.
    #[must_use]
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }

    /// Interval between heartbeats, which is also the record TTL.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.etcd_heartbeat_ttl.max(1))
    }

    /// Flush interval for the statsd sink.
    #[must_use]
    pub fn statsd_flush_interval(&self) -> Duration {
        Duration::from_secs(self.statsd_interval.max(1))
    }

    /// Bound on the event-log drain performed during shutdown, or `None`
    /// when the drain is unbounded.
    #[must_use]
    pub fn drain_timeout(&self) -> Option<Duration> {
        (self.shutdown_drain_timeout_secs > 0)
            .then(|| Duration::from_secs(self.shutdown_drain_timeout_secs))
    }

    /// Where the event log writes.
    #[must_use]
    pub fn log_destination(&self) -> LogDestination {
        LogDestination::from_setting(self.stderr_logfile.as_deref())
    }

    /// Whether both etcd client credentials and a CA are configured.
    #[must_use]
    pub fn etcd_uses_tls(&self) -> bool {
        [&self.etcd_cacert, &self.etcd_tlskey, &self.etcd_tlscert]
            .iter()
            .all(|value| value.as_deref().is_some_and(|text| !text.is_empty()))
    }

    /// Non-empty hostname override, if any.
    #[must_use]
    pub fn hostname_override(&self) -> Option<&str> {
        self.hostname.as_deref().filter(|name| !name.is_empty())
    }

    /// Copy with the hostname replaced by the resolved value.
    #[must_use]
    pub fn with_hostname(&self, hostname: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            ..self.clone()
        }
    }

    /// Copy safe to publish to external observers.
    ///
    /// Passwords and key material paths are cleared; everything else is kept
    /// so readers can reconstruct how the instance was started.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            influxdb_password: None,
            etcd_tlskey: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
        assert_eq!(config.web_addr, DEFAULT_WEB_ADDR);
        assert_eq!(config.etcd_prefix_key, DEFAULT_ETCD_PREFIX_KEY);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(3));
        assert_eq!(config.log_destination(), LogDestination::Stderr);
    }

    #[test]
    fn empty_hostname_is_not_an_override() {
        let config = Config {
            hostname: Some(String::new()),
            ..Config::default()
        };
        assert_eq!(config.hostname_override(), None);
        let resolved = config.with_hostname("node-a");
        assert_eq!(resolved.hostname_override(), Some("node-a"));
    }

    #[test]
    fn tls_requires_all_three_credentials() {
        let mut config = Config {
            etcd_cacert: Some("ca.pem".to_owned()),
            etcd_tlscert: Some("cert.pem".to_owned()),
            ..Config::default()
        };
        assert!(!config.etcd_uses_tls());
        config.etcd_tlskey = Some("key.pem".to_owned());
        assert!(config.etcd_uses_tls());
    }

    #[test]
    fn redacted_config_drops_secrets() {
        let config = Config {
            influxdb_password: Some("hunter2".to_owned()),
            etcd_tlskey: Some("/etc/key.pem".to_owned()),
            ..Config::default()
        };
        let redacted = config.redacted();
        assert_eq!(redacted.influxdb_password, None);
        assert_eq!(redacted.etcd_tlskey, None);
        assert_eq!(redacted.service_name, config.service_name);
    }

    #[test]
    fn zero_drain_timeout_means_unbounded() {
        let mut config = Config::default();
        assert_eq!(
            config.drain_timeout(),
            Some(Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS))
        );
        config.shutdown_drain_timeout_secs = 0;
        assert_eq!(config.drain_timeout(), None);
    }
}
