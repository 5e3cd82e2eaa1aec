//! Single-instance guard for a port.
//!
//! An instance counts as live only when the port answers a TCP connect AND
//! the PID file for that port names a running process. Startup is serialised
//! by an advisory lock so two starters never both pass the check.

use crate::config::ProxyConfig;
use crate::proxy_paths;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Connect timeout used when probing a port.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Who, if anyone, owns a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    Free,
    /// A proxy answers and its PID file names a live process.
    Live { pid: u32 },
    /// Something answers but no live proxy claims the port.
    Foreign,
}

/// Address to connect to when probing a listener bound to `host`.
pub fn probe_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "::1",
        other => other,
    }
}

/// Returns true if something accepts TCP connections on `host:port`.
pub async fn probe_port(host: &str, port: u16, timeout: Duration) -> bool {
    let addrs = match tokio::net::lookup_host((probe_host(host), port)).await {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!(target: "instance_lock", host, error = %e, "cannot resolve probe address");
            return false;
        }
    };
    for addr in addrs {
        if let Ok(Ok(_)) = tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            return true;
        }
    }
    false
}

fn read_pid_at(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// PID recorded for `port`, if a readable PID file exists.
pub fn read_pid(port: u16) -> Result<Option<u32>> {
    Ok(read_pid_at(&proxy_paths::pid_path(port)?))
}

/// Removes the PID file for `port` if present.
pub fn remove_pid_file(port: u16) -> Result<()> {
    let path = proxy_paths::pid_path(port)?;
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove PID file: {}", path.display())),
    }
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // EPERM: the process exists but belongs to someone else.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

// No cheap probe here; the port check decides.
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

/// Sends SIGTERM to `pid`.
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).with_context(|| format!("invalid pid {}", pid))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .with_context(|| format!("Failed to signal process {}", pid))
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status()
        .context("Failed to run taskkill")?;
    if !status.success() {
        anyhow::bail!("taskkill failed for process {}", pid);
    }
    Ok(())
}

/// Determines who owns `config.port`. Removes a PID file left by a dead process.
pub async fn check(config: &ProxyConfig) -> Result<Occupancy> {
    let port = config.port;
    let recorded = read_pid(port)?;
    let answering = probe_port(&config.host, port, PROBE_TIMEOUT).await;

    match recorded {
        Some(pid) if answering && process_alive(pid) => return Ok(Occupancy::Live { pid }),
        Some(pid) if !process_alive(pid) || !answering => {
            info!(target: "instance_lock", port, pid, "removing stale PID file");
            remove_pid_file(port)?;
        }
        _ => {}
    }

    Ok(if answering {
        Occupancy::Foreign
    } else {
        Occupancy::Free
    })
}

/// Exclusive advisory lock on `<home>/proxy-<port>.lock`, released on drop.
#[derive(Debug)]
pub struct StartupLock {
    file: File,
}

impl StartupLock {
    /// Takes the lock without blocking. `None` means another starter holds it.
    pub fn try_acquire(port: u16) -> Result<Option<Self>> {
        let path = proxy_paths::lock_path(port)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).context("Failed to acquire startup lock"),
        }
    }
}

impl Drop for StartupLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// PID file owned by this process; removed on drop if it still names us.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Writes `pid` for `port` atomically (temp file, then rename).
    pub fn create(port: u16, pid: u32) -> Result<Self> {
        let path = proxy_paths::pid_path(port)?;
        let tmp = path.with_extension(format!("pid.{}.tmp", pid));
        fs::write(&tmp, pid.to_string())
            .with_context(|| format!("Failed to write PID file: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move PID file into place: {}", path.display()))?;
        debug!(target: "instance_lock", port, pid, path = %path.display(), "PID file written");
        Ok(Self { path, pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if read_pid_at(&self.path) != Some(self.pid) {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(
                target: "instance_lock",
                path = %self.path.display(),
                error = %e,
                "failed to remove PID file"
            );
        }
    }
}

#[cfg(test)]
#[path = "instance_lock_tests.rs"]
mod tests;
