//! Start, stop and query a proxy on a port.
//!
//! Foreground start serves in this process. Background start re-runs this
//! binary detached with the same settings and reports once the child owns
//! the port (or fails to within the startup wait).

use crate::config::ProxyConfig;
use crate::instance_lock::{self, Occupancy};
use crate::proxy_paths;
use crate::server::{self, ServerInstance, StartOutcome};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReport {
    AlreadyRunning { pid: u32 },
    /// A background child took the port.
    Started { pid: u32 },
    /// Foreground serving ran to completion.
    Served,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReport {
    NotRunning,
    Stopped { pid: u32 },
}

pub async fn start(
    config: &ProxyConfig,
    background: bool,
    config_path: Option<&Path>,
) -> Result<StartReport> {
    if background {
        return spawn_background(config, config_path).await;
    }

    match ServerInstance::bind(config).await? {
        StartOutcome::AlreadyRunning { pid } => Ok(StartReport::AlreadyRunning { pid }),
        StartOutcome::Started(instance) => {
            info!(
                target: "lifecycle",
                addr = %instance.local_addr(),
                port = instance.port(),
                "serving in foreground"
            );
            instance.wait().await?;
            Ok(StartReport::Served)
        }
    }
}

async fn spawn_background(
    config: &ProxyConfig,
    config_path: Option<&Path>,
) -> Result<StartReport> {
    let port = config.port;
    if port == 0 {
        anyhow::bail!("background start needs a fixed port");
    }

    match instance_lock::check(config).await? {
        Occupancy::Live { pid } => return Ok(StartReport::AlreadyRunning { pid }),
        Occupancy::Foreign => anyhow::bail!("port {} in use by another process", port),
        Occupancy::Free => {}
    }

    let exe = std::env::current_exe()
        .or_else(|_| which::which("worker-proxy"))
        .context("Failed to find worker-proxy binary")?;
    let home_dir = proxy_paths::proxy_home_dir()?;
    let log_path = proxy_paths::log_path(port)?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;
    let log_err = log.try_clone().context("Failed to duplicate log handle")?;

    let mut command = background_command(&exe, config, config_path, &home_dir);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    let mut child = command
        .spawn()
        .context("Failed to spawn background proxy")?;
    let child_pid = child.id();
    info!(
        target: "lifecycle",
        port,
        pid = child_pid,
        log = %log_path.display(),
        "spawned background proxy"
    );

    let deadline = Instant::now() + config.startup_wait;
    loop {
        let exited = child
            .try_wait()
            .context("Failed to poll background proxy")?;

        if let Occupancy::Live { pid } = instance_lock::check(config).await? {
            return Ok(if pid == child_pid {
                StartReport::Started { pid }
            } else {
                StartReport::AlreadyRunning { pid }
            });
        }

        if let Some(status) = exited {
            anyhow::bail!(
                "background proxy exited early ({}); see {}",
                status,
                log_path.display()
            );
        }
        if Instant::now() >= deadline {
            anyhow::bail!(
                "background proxy (pid {}) did not start within {:?}; see {}",
                child_pid,
                config.startup_wait,
                log_path.display()
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Command line of a detached `serve` carrying the effective settings.
///
/// The child gets the same storage root so it writes its PID file where the
/// parent looks for it.
fn background_command(
    exe: &Path,
    config: &ProxyConfig,
    config_path: Option<&Path>,
    home_dir: &Path,
) -> Command {
    let mut command = Command::new(exe);
    command
        .arg("serve")
        .arg("--port")
        .arg(config.port.to_string())
        .arg("--host")
        .arg(&config.host)
        .arg("--connect-timeout-secs")
        .arg(config.connect_timeout.as_secs().to_string())
        .arg("--request-timeout-secs")
        .arg(config.request_timeout.as_secs().to_string());
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    command.env(proxy_paths::HOME_ENV, home_dir);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(0x00000008); // DETACHED_PROCESS
    }

    command
}

/// Stops the proxy owning `config.port`, in this process or another.
pub async fn stop(config: &ProxyConfig) -> Result<StopReport> {
    let port = config.port;
    let own_pid = std::process::id();

    if server::request_local_stop(port) {
        info!(target: "lifecycle", port, "stop requested for in-process listener");
        return Ok(StopReport::Stopped { pid: own_pid });
    }

    let Some(pid) = instance_lock::read_pid(port)? else {
        return Ok(StopReport::NotRunning);
    };
    if pid == own_pid || !instance_lock::process_alive(pid) {
        debug!(target: "lifecycle", port, pid, "PID file has no live owner");
        instance_lock::remove_pid_file(port)?;
        return Ok(StopReport::NotRunning);
    }

    instance_lock::terminate(pid)?;
    info!(target: "lifecycle", port, pid, "sent SIGTERM");

    let deadline = Instant::now() + config.startup_wait;
    while instance_lock::probe_port(&config.host, port, instance_lock::PROBE_TIMEOUT).await {
        if Instant::now() >= deadline {
            warn!(target: "lifecycle", port, pid, "port still answering after stop");
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if instance_lock::read_pid(port)? == Some(pid) {
        instance_lock::remove_pid_file(port)?;
    }
    Ok(StopReport::Stopped { pid })
}

/// Asks the proxy on `config.port` for its `proxy/status` result.
pub async fn status(config: &ProxyConfig) -> Result<Value> {
    let url = format!(
        "http://{}:{}/",
        instance_lock::probe_host(&config.host),
        config.port
    );
    let timeout = config.connect_timeout;

    tokio::task::spawn_blocking(move || query_status(&url, timeout))
        .await
        .context("Status query task failed")?
}

fn query_status(url: &str, timeout: Duration) -> Result<Value> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .proxy(None)
        .build()
        .into();

    let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "proxy/status" });
    let mut response = agent
        .post(url)
        .header("Content-Type", "application/json")
        .send(request.to_string())
        .with_context(|| format!("No proxy reachable at {}", url))?;
    let text = response
        .body_mut()
        .read_to_string()
        .context("Failed to read status response")?;
    let mut reply: Value = serde_json::from_str(&text).context("Status response is not JSON")?;

    if let Some(error) = reply.get("error") {
        anyhow::bail!("proxy returned an error: {}", error);
    }
    reply
        .get_mut("result")
        .map(Value::take)
        .context("Status response has no result")
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
