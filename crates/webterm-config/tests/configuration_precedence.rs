//! Layering tests for [`Config::load_from_iter`].

use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use ortho_config::OrthoConfig;
use webterm_config::{Config, DEFAULT_SERVICE_NAME, DEFAULT_WEB_ADDR, LogDestination};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let previous = std::env::var_os(key);
        // Environment mutation is unsafe in edition 2024; callers hold
        // `ENV_MUTEX` for the lifetime of the override.
        unsafe { std::env::set_var(key, value) };
        Self { key, previous }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
    }
}

struct Harness {
    temp_dir: TempDir,
    _guard: MutexGuard<'static, ()>,
}

impl Harness {
    fn config_file(&self, contents: &str) -> OsString {
        let path = self.temp_dir.path().join("webterm.toml");
        fs::write(&path, contents).expect("write configuration file");
        path.into_os_string()
    }
}

#[fixture]
fn harness() -> Harness {
    let guard = ENV_MUTEX
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    Harness {
        temp_dir: TempDir::new().expect("temp dir"),
        _guard: guard,
    }
}

fn args(extra: &[&OsStr]) -> Vec<OsString> {
    let mut args = vec![OsString::from("webtermd")];
    args.extend(extra.iter().map(|value| value.to_os_string()));
    args
}

#[rstest]
fn defaults_apply_without_overrides(harness: Harness) {
    let _ = &harness;
    let config = Config::load_from_iter(args(&[])).expect("load defaults");
    assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
    assert_eq!(config.web_addr, DEFAULT_WEB_ADDR);
    assert_eq!(config.log_destination(), LogDestination::Stderr);
    assert!(config.terminate_parent);
}

#[rstest]
fn file_values_are_loaded(harness: Harness) {
    let path = harness.config_file("service_name = \"from-file\"\nweb_addr = \"127.0.0.1:7000\"\n");
    let config = Config::load_from_iter(args(&[OsStr::new("--config-path"), path.as_os_str()]))
        .expect("load file");
    assert_eq!(config.service_name, "from-file");
    assert_eq!(config.web_addr, "127.0.0.1:7000");
}

#[rstest]
fn environment_overrides_file(harness: Harness) {
    let path = harness.config_file("service_name = \"from-file\"\n");
    let _env = EnvOverride::set_var("WEBTERM_SERVICE_NAME", OsStr::new("from-env"));
    let config = Config::load_from_iter(args(&[OsStr::new("--config-path"), path.as_os_str()]))
        .expect("load file and env");
    assert_eq!(config.service_name, "from-env");
}

#[rstest]
fn cli_overrides_environment(harness: Harness) {
    let _ = &harness;
    let _env = EnvOverride::set_var("WEBTERM_SERVICE_NAME", OsStr::new("from-env"));
    let config = Config::load_from_iter(args(&[
        OsStr::new("--service-name"),
        OsStr::new("from-cli"),
    ]))
    .expect("load cli");
    assert_eq!(config.service_name, "from-cli");
}

#[rstest]
fn serialised_config_round_trips(harness: Harness) {
    let _ = &harness;
    let config = Config {
        hostname: Some("node-a".to_owned()),
        etcd_addr: Some("http://127.0.0.1:2379".to_owned()),
        ..Config::default()
    };
    let json = serde_json::to_string(&config).expect("serialise");
    let decoded: Config = serde_json::from_str(&json).expect("deserialise");
    assert_eq!(decoded, config);
}
