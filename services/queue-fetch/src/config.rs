//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Session credentials live in a separate JSON file referenced by
//! `sessions_file`, never in the TOML itself.

use queue_client::ClientOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// JSON file with the session list; relative paths resolve against the config file
    pub sessions_file: PathBuf,
    pub client: ClientConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Queue client settings
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(flatten)]
    pub options: ClientOptions,
    /// Write every response to the dump directory
    #[serde(default)]
    pub dump: bool,
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

/// Upstream HTTP settings
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Client-wide proxy, overriding per-session proxies
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            proxy: None,
        }
    }
}

/// Metrics output
#[derive(Debug, Default, Deserialize)]
pub struct MetricsConfig {
    /// Write a Prometheus text snapshot here on exit
    #[serde(default)]
    pub snapshot_file: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

const PROXY_SCHEMES: &[&str] = &["http://", "https://", "socks5://", "socks5h://"];

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `QUEUE_FETCH_PROXY` replaces `http.proxy`; an empty value clears it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(proxy) = std::env::var("QUEUE_FETCH_PROXY") {
            let proxy = proxy.trim().to_owned();
            config.http.proxy = (!proxy.is_empty()).then_some(proxy);
        }

        if config.client.options.queue.trim().is_empty() {
            return Err(common::Error::Config("client.queue must not be empty".into()));
        }

        if config.client.options.change == 0 {
            return Err(common::Error::Config(
                "client.change must be greater than 0".into(),
            ));
        }

        if config.client.options.max_attempts == Some(0) {
            return Err(common::Error::Config(
                "client.max_attempts must be greater than 0 when set".into(),
            ));
        }

        if config.http.timeout_secs == 0 {
            return Err(common::Error::Config(
                "http.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.http.connect_timeout_secs == 0 {
            return Err(common::Error::Config(
                "http.connect_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Some(ref proxy) = config.http.proxy
            && !PROXY_SCHEMES.iter().any(|s| proxy.starts_with(s))
        {
            return Err(common::Error::Config(format!(
                "http.proxy must start with one of {PROXY_SCHEMES:?}, got: {proxy}"
            )));
        }

        if config.sessions_file.is_relative()
            && let Some(base) = path.parent()
        {
            config.sessions_file = base.join(&config.sessions_file);
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("queue-fetch.toml")
    }
}
