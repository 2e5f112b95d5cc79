//! Discovery store seam and its etcd v2 implementation.

use std::fs;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{Certificate, Identity};
use url::Url;

use webterm_config::Config;

use super::DiscoveryError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Key/value store with expiring entries used for service discovery.
#[cfg_attr(test, mockall::automock)]
pub trait DiscoveryStore: Send + Sync {
    /// Writes `value` under `key`, expiring after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DiscoveryError>;
    /// Removes `key`.
    fn delete(&self, key: &str) -> Result<(), DiscoveryError>;
}

/// TLS material for reaching etcd over HTTPS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EtcdTls {
    /// PEM file with the CA certificate to trust.
    pub ca_cert: Option<String>,
    /// PEM file with the client certificate.
    pub client_cert: Option<String>,
    /// PEM file with the client private key.
    pub client_key: Option<String>,
}

impl EtcdTls {
    /// TLS settings named in `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            ca_cert: config.etcd_cacert.clone(),
            client_cert: config.etcd_tlscert.clone(),
            client_key: config.etcd_tlskey.clone(),
        }
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>, DiscoveryError> {
    fs::read(path).map_err(|source| DiscoveryError::ReadPem {
        path: path.to_owned(),
        source,
    })
}

/// etcd v2 keys API client.
#[derive(Debug, Clone)]
pub struct EtcdStore {
    client: Client,
    base: Url,
}

impl EtcdStore {
    /// Builds a client for the etcd server at `addr`.
    pub fn new(addr: &str, tls: &EtcdTls) -> Result<Self, DiscoveryError> {
        let base = Url::parse(addr).map_err(|source| DiscoveryError::Address {
            addr: addr.to_owned(),
            source,
        })?;
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT).no_proxy();
        if let Some(path) = tls.ca_cert.as_deref() {
            let certificate = Certificate::from_pem(&read_pem(path)?)
                .map_err(|source| DiscoveryError::Tls { source })?;
            builder = builder.add_root_certificate(certificate);
        }
        if let (Some(cert), Some(key)) = (tls.client_cert.as_deref(), tls.client_key.as_deref()) {
            let mut pem = read_pem(cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(key)?);
            let identity =
                Identity::from_pem(&pem).map_err(|source| DiscoveryError::Tls { source })?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|source| DiscoveryError::Tls { source })?;
        Ok(Self { client, base })
    }

    /// Store configured by `etcd_*` settings, or `None` when no address is
    /// set.
    pub fn from_config(config: &Config) -> Result<Option<Self>, DiscoveryError> {
        match config.etcd_addr.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => {
                Self::new(addr, &EtcdTls::from_config(config)).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// URL of `key` in the v2 keys API.
    pub fn key_url(&self, key: &str) -> Result<Url, DiscoveryError> {
        let path = format!("v2/keys/{}", key.trim_start_matches('/'));
        self.base
            .join(&path)
            .map_err(|source| DiscoveryError::Address {
                addr: path,
                source,
            })
    }
}

impl DiscoveryStore for EtcdStore {
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DiscoveryError> {
        let ttl = ttl.as_secs().max(1).to_string();
        self.client
            .put(self.key_url(key)?)
            .form(&[("value", value), ("ttl", ttl.as_str())])
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map(drop)
            .map_err(|source| DiscoveryError::Request {
                key: key.to_owned(),
                source,
            })
    }

    fn delete(&self, key: &str) -> Result<(), DiscoveryError> {
        self.client
            .delete(self.key_url(key)?)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map(drop)
            .map_err(|source| DiscoveryError::Request {
                key: key.to_owned(),
                source,
            })
    }
}
