//! Proxy configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `WORKER_PROXY_*` environment variables. CLI flags are applied last by `main`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STARTUP_WAIT_SECS: u64 = 2;
const DEFAULT_MAX_ERROR_LEN: usize = 500;
const MIN_ERROR_LEN: usize = 16;

pub const PORT_ENV: &str = "WORKER_PROXY_PORT";
pub const CONNECT_TIMEOUT_ENV: &str = "WORKER_PROXY_CONNECT_TIMEOUT_SECS";
pub const REQUEST_TIMEOUT_ENV: &str = "WORKER_PROXY_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    /// Listening port. `0` binds an ephemeral port and skips the instance probe.
    pub port: u16,
    /// Upper bound for establishing the TCP connection to a worker.
    pub connect_timeout: Duration,
    /// Upper bound for a whole forward, connect included.
    pub request_timeout: Duration,
    /// How long a background start (or a stop) waits before reporting.
    pub startup_wait: Duration,
    /// Forwarding error reasons are cut to this many characters.
    pub max_error_len: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            startup_wait: Duration::from_secs(DEFAULT_STARTUP_WAIT_SECS),
            max_error_len: DEFAULT_MAX_ERROR_LEN,
        }
    }
}

/// On-disk shape of the YAML config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    startup_wait_secs: Option<u64>,
    max_error_len: Option<usize>,
}

impl ProxyConfig {
    /// Builds a config from defaults, an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            config
                .apply_yaml(&content)
                .with_context(|| format!("Invalid config file: {}", path.display()))?;
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, content: &str) -> Result<()> {
        let file: ConfigFile = if content.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(content).context("Failed to parse YAML")?
        };

        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(secs) = file.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.startup_wait_secs {
            self.startup_wait = Duration::from_secs(secs);
        }
        if let Some(len) = file.max_error_len {
            self.max_error_len = len;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(port) = env_number::<u16>(PORT_ENV)? {
            self.port = port;
        }
        if let Some(secs) = env_number::<u64>(CONNECT_TIMEOUT_ENV)? {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number::<u64>(REQUEST_TIMEOUT_ENV)? {
            self.request_timeout = Duration::from_secs(secs);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            anyhow::bail!("connect timeout must be greater than zero");
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("request timeout must be greater than zero");
        }
        if self.max_error_len < MIN_ERROR_LEN {
            anyhow::bail!(
                "max_error_len must be at least {} (got {})",
                MIN_ERROR_LEN,
                self.max_error_len
            );
        }
        Ok(())
    }

    /// `host:port` form used for binding and probing.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a number, got '{}'", name, raw)),
        _ => Ok(None),
    }
}
