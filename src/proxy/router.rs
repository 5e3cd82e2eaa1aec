//! Request router.
//!
//! Picks a worker, forwards the payload once, and reports the outcome to the
//! health state machine through the registry. There is no retry within a
//! request; the only retry-like behaviour is the optimistic recovery attempt
//! on a non-ready target, and a later request after a heartbeat.
//!
//! Each route runs on its own task. A client that hangs up drops only the
//! wait for the answer; the forward and its outcome still land.

use crate::config::ProxyConfig;
use crate::proxy::error::ProxyError;
use crate::proxy::forward::Forwarder;
use crate::proxy::health::FailureOutcome;
use crate::proxy::registry::Registry;
use axum::body::Bytes;
use std::sync::Arc;
use tracing::debug;

pub struct Router {
    registry: Arc<Registry>,
    forwarder: Forwarder,
}

impl Router {
    pub fn new(registry: Arc<Registry>, config: &ProxyConfig) -> Self {
        Self {
            registry,
            forwarder: Forwarder::new(config),
        }
    }

    /// Forwards `body` to `target`, or to the default worker when `None`.
    ///
    /// Returns the worker's response body unchanged.
    pub async fn route(&self, body: Bytes, target: Option<&str>) -> Result<Vec<u8>, ProxyError> {
        let registry = self.registry.clone();
        let forwarder = self.forwarder.clone();
        let target = target.map(str::to_string);

        let task = tokio::spawn(async move {
            route_once(&registry, &forwarder, body, target.as_deref()).await
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ProxyError::Internal(format!("routing task failed: {}", e))),
        }
    }
}

async fn route_once(
    registry: &Registry,
    forwarder: &Forwarder,
    body: Bytes,
    target: Option<&str>,
) -> Result<Vec<u8>, ProxyError> {
    let target = registry.acquire_target(target).await?;
    debug!(
        target: "router",
        id = %target.id,
        endpoint = %target.endpoint,
        optimistic = target.optimistic,
        "forwarding request"
    );

    match forwarder.forward(&target.endpoint, body).await {
        Ok(response) => {
            registry.record_success(&target).await;
            Ok(response)
        }
        Err(reason) => match registry.record_failure(&target, reason.clone()).await {
            Some((FailureOutcome::RecoveryFailed, status)) => Err(ProxyError::WorkerNotReady {
                id: target.id,
                status,
                reason,
            }),
            None if target.optimistic => Err(ProxyError::WorkerNotReady {
                id: target.id,
                status: target.prior_status,
                reason,
            }),
            _ => Err(ProxyError::ForwardFailed {
                id: target.id,
                reason,
            }),
        },
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
