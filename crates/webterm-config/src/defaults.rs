/// Service name used when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "webterm";

/// Listener address used when none is configured.
pub const DEFAULT_WEB_ADDR: &str = "0.0.0.0:5000";

/// Connection read/write timeout in seconds.
pub const DEFAULT_WEB_TIMEOUT_SECS: u64 = 10;

/// Largest accepted request header.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 16;

/// statsd flush interval in seconds.
pub const DEFAULT_STATSD_INTERVAL_SECS: u64 = 2;

/// Prefix for statsd metric names.
pub const DEFAULT_STATSD_PREFIX: &str = "webterm.";

/// Prefix for graphite metric paths.
pub const DEFAULT_GRAPHITE_PREFIX: &str = "webterm-metrics.";

/// Key prefix for discovery heartbeats.
pub const DEFAULT_ETCD_PREFIX_KEY: &str = "/services/webterm";

/// Heartbeat interval and TTL in seconds.
pub const DEFAULT_HEARTBEAT_TTL_SECS: u64 = 3;

/// Runtime sampling interval in milliseconds.
pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 1_000;

/// Event-log drain bound applied at shutdown, in seconds.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

// Owned variants for serde `default = "..."` attributes.

pub(crate) fn service_name() -> String {
    DEFAULT_SERVICE_NAME.to_owned()
}

pub(crate) fn web_addr() -> String {
    DEFAULT_WEB_ADDR.to_owned()
}

pub(crate) const fn web_timeout_secs() -> u64 {
    DEFAULT_WEB_TIMEOUT_SECS
}

pub(crate) const fn max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_BYTES
}

pub(crate) const fn statsd_interval_secs() -> u64 {
    DEFAULT_STATSD_INTERVAL_SECS
}

pub(crate) fn statsd_prefix() -> String {
    DEFAULT_STATSD_PREFIX.to_owned()
}

pub(crate) fn graphite_prefix() -> String {
    DEFAULT_GRAPHITE_PREFIX.to_owned()
}

pub(crate) fn etcd_prefix_key() -> String {
    DEFAULT_ETCD_PREFIX_KEY.to_owned()
}

pub(crate) const fn heartbeat_ttl_secs() -> u64 {
    DEFAULT_HEARTBEAT_TTL_SECS
}

pub(crate) const fn metrics_interval_ms() -> u64 {
    DEFAULT_METRICS_INTERVAL_MS
}

pub(crate) const fn drain_timeout_secs() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_SECS
}

pub(crate) const fn terminate_parent() -> bool {
    true
}

pub(crate) fn log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}
