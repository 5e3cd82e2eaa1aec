//! HTTP listener for the proxy.
//!
//! One route, `/`: POST carries JSON-RPC (or an empty liveness probe), GET
//! answers the health payload. A `ServerInstance` owns the listener task and
//! the PID file for its port; dropping the PID file is tied to the instance.

use crate::config::ProxyConfig;
use crate::instance_lock::{self, Occupancy, PidFile, StartupLock};
use crate::proxy::admin;
use crate::proxy::dispatch::{dispatch, Reply};
use crate::proxy::error::ProxyError;
use crate::proxy::protocol::TARGET_HEADER;
use crate::proxy::ProxyContext;
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Stop handles of listeners running in this process, by port.
static LOCAL_LISTENERS: LazyLock<Mutex<HashMap<u16, Arc<Notify>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn local_listeners() -> std::sync::MutexGuard<'static, HashMap<u16, Arc<Notify>>> {
    LOCAL_LISTENERS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Asks the listener this process runs on `port` to shut down.
///
/// Returns false if no such listener exists here.
pub fn request_local_stop(port: u16) -> bool {
    match local_listeners().get(&port) {
        Some(stop) => {
            stop.notify_one();
            true
        }
        None => false,
    }
}

pub fn build_app(ctx: Arc<ProxyContext>) -> axum::Router {
    axum::Router::new()
        .route("/", post(handle_post).get(handle_health))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn handle_post(
    State(ctx): State<Arc<ProxyContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = headers
        .get(TARGET_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let reply = dispatch(&ctx, target, body).await;
    json_response(reply.status, reply.body)
}

async fn handle_health(State(ctx): State<Arc<ProxyContext>>) -> Response {
    Json(admin::health_payload(&ctx)).into_response()
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    let reply = Reply::error(
        Value::Null,
        &ProxyError::Internal(format!("handler panicked: {}", detail)),
    );
    json_response(reply.status, reply.body)
}

/// Result of trying to bring up a listener.
pub enum StartOutcome {
    Started(ServerInstance),
    /// A live proxy already owns the port; nothing was bound.
    AlreadyRunning { pid: u32 },
}

/// A bound, serving listener.
pub struct ServerInstance {
    port: u16,
    local_addr: SocketAddr,
    context: Arc<ProxyContext>,
    stop: Arc<Notify>,
    task: JoinHandle<std::io::Result<()>>,
    _pid_file: PidFile,
}

enum Exit {
    Signal,
    Finished(Result<std::io::Result<()>, JoinError>),
}

impl ServerInstance {
    /// Binds `config.port` unless a live proxy already owns it.
    ///
    /// Port `0` binds an ephemeral port and skips the ownership checks.
    pub async fn bind(config: &ProxyConfig) -> Result<StartOutcome> {
        let requested = config.port;

        let _lock = if requested == 0 {
            None
        } else {
            match StartupLock::try_acquire(requested)? {
                Some(lock) => Some(lock),
                None => return wait_for_winner(config).await,
            }
        };

        if requested != 0 {
            match instance_lock::check(config).await? {
                Occupancy::Live { pid } => {
                    info!(target: "server", port = requested, pid, "proxy already running");
                    return Ok(StartOutcome::AlreadyRunning { pid });
                }
                Occupancy::Foreign => {
                    anyhow::bail!("port {} in use by another process", requested);
                }
                Occupancy::Free => {}
            }
        }

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        let local_addr = listener.local_addr().context("Failed to read bound address")?;
        let port = local_addr.port();
        let pid = std::process::id();
        let pid_file = PidFile::create(port, pid)?;

        let context = Arc::new(ProxyContext::new(config, port));
        let app = build_app(context.clone());
        let stop = Arc::new(Notify::new());
        local_listeners().insert(port, stop.clone());

        let shutdown = stop.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await
        });

        info!(
            target: "server",
            %local_addr,
            pid,
            pid_file = %pid_file.path().display(),
            "proxy listening"
        );

        Ok(StartOutcome::Started(Self {
            port,
            local_addr,
            context,
            stop,
            task,
            _pid_file: pid_file,
        }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[cfg(test)]
    pub fn context(&self) -> &Arc<ProxyContext> {
        &self.context
    }

    /// Closes the listener, waits for in-flight requests and removes the PID file.
    pub async fn stop(self) -> Result<()> {
        self.stop.notify_one();
        let joined = self.task.await;
        local_listeners().remove(&self.port);
        info!(target: "server", port = self.port, "proxy stopped");
        join_result(joined)
    }

    /// Serves until Ctrl-C, SIGTERM or an in-process stop request.
    pub async fn wait(mut self) -> Result<()> {
        let exit = tokio::select! {
            _ = shutdown_signal() => Exit::Signal,
            joined = &mut self.task => Exit::Finished(joined),
        };

        match exit {
            Exit::Signal => {
                info!(target: "server", port = self.port, "shutdown signal received");
                self.stop().await
            }
            Exit::Finished(joined) => {
                local_listeners().remove(&self.port);
                info!(target: "server", port = self.port, "proxy stopped");
                join_result(joined)
            }
        }
    }
}

fn join_result(joined: Result<std::io::Result<()>, JoinError>) -> Result<()> {
    joined
        .context("Server task failed")?
        .context("Server terminated with an error")
}

/// Another starter holds the lock; report its instance once it answers.
async fn wait_for_winner(config: &ProxyConfig) -> Result<StartOutcome> {
    let deadline = Instant::now() + config.startup_wait;
    loop {
        if let Occupancy::Live { pid } = instance_lock::check(config).await? {
            info!(
                target: "server",
                port = config.port,
                pid,
                "concurrent start won by another process"
            );
            return Ok(StartOutcome::AlreadyRunning { pid });
        }
        if Instant::now() >= deadline {
            anyhow::bail!(
                "another process is starting a proxy on port {} but it did not come up",
                config.port
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(target: "server", error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(target: "server", error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
