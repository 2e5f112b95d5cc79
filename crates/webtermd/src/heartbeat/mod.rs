//! Service discovery heartbeat.
//!
//! While the service runs, a JSON announcement is refreshed in the discovery
//! store under `prefix/service/hostname.pid` with a TTL, so the entry
//! disappears on its own if the process dies without cleaning up.

mod store;

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use webterm_config::Config;

use crate::events::EventSender;

pub use store::{DiscoveryStore, EtcdStore, EtcdTls};
#[cfg(test)]
pub use store::MockDiscoveryStore;

pub(crate) const HEARTBEAT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::heartbeat");

/// Errors raised by the discovery store.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The store address or a key URL was invalid.
    #[error("invalid discovery address {addr}: {source}")]
    Address {
        /// Offending address or path.
        addr: String,
        /// Underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// A PEM file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadPem {
        /// File path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// TLS material was rejected or the client could not be built.
    #[error("failed to configure discovery client: {source}")]
    Tls {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The request failed or returned an error status.
    #[error("discovery request for {key} failed: {source}")]
    Request {
        /// Key involved.
        key: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

/// Value published under the heartbeat key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Process id of the announcing generation.
    pub pid: u32,
    /// Effective configuration with credentials removed.
    pub config: Config,
}

impl Announcement {
    /// Announcement for `pid` running `config`. Credentials are redacted.
    #[must_use]
    pub fn new(pid: u32, config: &Config) -> Self {
        Self {
            pid,
            config: config.redacted(),
        }
    }

    /// JSON form stored in the discovery store.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Discovery key for one process: `prefix/service/hostname.pid`.
#[must_use]
pub fn heartbeat_key(prefix: &str, service: &str, hostname: &str, pid: u32) -> String {
    format!("{}/{service}/{hostname}.{pid}", prefix.trim_end_matches('/'))
}

/// Periodically refreshes the announcement in a [`DiscoveryStore`].
#[derive(Clone)]
pub struct HeartbeatPublisher {
    store: Arc<dyn DiscoveryStore>,
    key: String,
    value: String,
    ttl: Duration,
}

impl std::fmt::Debug for HeartbeatPublisher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HeartbeatPublisher")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl HeartbeatPublisher {
    /// Publisher writing `value` under `key` every `ttl`, with that TTL.
    pub fn new(
        store: Arc<dyn DiscoveryStore>,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            value: value.into(),
            ttl: ttl.max(Duration::from_secs(1)),
        }
    }

    /// Key written by this publisher.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Writes the announcement once. Failures become one error event.
    pub fn beat(&self, events: &EventSender) -> bool {
        match self.store.set(&self.key, &self.value, self.ttl) {
            Ok(()) => {
                debug!(target: HEARTBEAT_TARGET, key = %self.key, "heartbeat published");
                true
            }
            Err(error) => {
                events.error("failed to publish heartbeat", &error);
                false
            }
        }
    }

    /// Best-effort removal of the announcement.
    pub fn withdraw(&self, events: &EventSender) {
        match self.store.delete(&self.key) {
            Ok(()) => debug!(target: HEARTBEAT_TARGET, key = %self.key, "heartbeat withdrawn"),
            Err(error) => {
                events.error("failed to remove heartbeat", &error);
            }
        }
    }

    /// Publishes immediately and then once per TTL until `stop` fires or
    /// disconnects, withdrawing the entry on the way out.
    pub fn spawn(self, events: EventSender, stop: Receiver<()>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("heartbeat".to_owned())
            .spawn(move || {
                self.beat(&events);
                loop {
                    match stop.recv_timeout(self.ttl) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.beat(&events);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                self.withdraw(&events);
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use mockall::predicate::eq;
    use std::sync::mpsc;

    #[test]
    fn key_joins_prefix_service_host_and_pid() {
        assert_eq!(
            heartbeat_key("/services/webterm/", "edge", "web-1", 42),
            "/services/webterm/edge/web-1.42"
        );
    }

    #[test]
    fn announcement_round_trips_without_credentials() {
        let config = Config {
            influxdb_password: Some("hunter2".to_owned()),
            etcd_tlskey: Some("/etc/key.pem".to_owned()),
            ..Config::default()
        };
        let json = Announcement::new(7, &config).to_json().expect("json");
        assert!(!json.contains("hunter2"));
        let decoded: Announcement = serde_json::from_str(&json).expect("decode");
        assert_eq!(decoded.pid, 7);
        assert_eq!(decoded.config, config.redacted());
    }

    #[test]
    fn failed_beat_emits_one_error_event() {
        let mut store = MockDiscoveryStore::new();
        store.expect_set().times(1).returning(|key, _, _| {
            Err(DiscoveryError::Address {
                addr: key.to_owned(),
                source: url::ParseError::EmptyHost,
            })
        });
        let publisher =
            HeartbeatPublisher::new(Arc::new(store), "/k", "v", Duration::from_secs(3));
        let (sender, receiver) = events::channel(4);
        assert!(!publisher.beat(&sender));
        sender.close();
        let events: Vec<_> = receiver.into_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "failed to publish heartbeat");
    }

    #[test]
    fn spawned_publisher_beats_then_withdraws_on_stop() {
        let mut store = MockDiscoveryStore::new();
        store
            .expect_set()
            .with(eq("/k"), eq("v"), eq(Duration::from_secs(1)))
            .times(1..)
            .returning(|_, _, _| Ok(()));
        store
            .expect_delete()
            .with(eq("/k"))
            .times(1)
            .returning(|_| Ok(()));
        let publisher =
            HeartbeatPublisher::new(Arc::new(store), "/k", "v", Duration::from_millis(10));
        let (sender, _receiver) = events::channel(16);
        let (stop, stopped) = mpsc::channel();
        let handle = publisher.spawn(sender, stopped).expect("spawn heartbeat");
        stop.send(()).expect("stop");
        handle.join().expect("heartbeat thread");
    }
}
