//! Storage paths for the proxy's per-port process files.
//!
//! Everything lives under one root directory:
//! - `proxy-<port>.pid` - PID of the process owning the port
//! - `proxy-<port>.lock` - advisory lock serialising startup
//! - `logs/proxy-<port>.log` - output of background-started instances
//!
//! The root is `$WORKER_PROXY_HOME` when set, otherwise the platform cache
//! directory joined with `worker-proxy`, otherwise `~/.worker-proxy`.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Environment variable overriding the storage root.
pub const HOME_ENV: &str = "WORKER_PROXY_HOME";

const PROXY_DIR: &str = "worker-proxy";

const FALLBACK_DIR: &str = ".worker-proxy";

/// Returns the storage root, creating it if needed.
///
/// # Errors
///
/// Returns an error if:
/// - Neither a cache directory nor a home directory can be determined
/// - Directory creation fails
pub fn proxy_home_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(HOME_ENV) {
        Some(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => match dirs::cache_dir() {
            Some(cache) => cache.join(PROXY_DIR),
            None => dirs::home_dir()
                .context("Could not determine a cache or home directory for proxy state")?
                .join(FALLBACK_DIR),
        },
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create proxy directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the PID file path for a port: `<home>/proxy-<port>.pid`
pub fn pid_path(port: u16) -> Result<PathBuf> {
    Ok(proxy_home_dir()?.join(format!("proxy-{}.pid", port)))
}

/// Returns the startup lock path for a port: `<home>/proxy-<port>.lock`
pub fn lock_path(port: u16) -> Result<PathBuf> {
    Ok(proxy_home_dir()?.join(format!("proxy-{}.lock", port)))
}

/// Returns the background log path for a port: `<home>/logs/proxy-<port>.log`
///
/// Creates the logs directory if it doesn't exist.
pub fn log_path(port: u16) -> Result<PathBuf> {
    let logs = proxy_home_dir()?.join("logs");
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs.join(format!("proxy-{}.log", port)))
}

#[cfg(test)]
#[path = "proxy_paths_tests.rs"]
mod tests;
