//! In-memory worker registry.
//!
//! One lock covers the whole map. It is only held for map reads and writes,
//! never across a forward, so a slow worker cannot stall the registry.

use crate::proxy::error::ProxyError;
use crate::proxy::health::{self, FailureOutcome};
use crate::proxy::protocol::{RegisterParams, WorkerConnection, WorkerStatus};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

struct RegistryState {
    /// Workers keyed by id.
    workers: HashMap<String, WorkerConnection>,
    /// Next registration generation. Also gives registration order.
    next_generation: u64,
}

impl RegistryState {
    /// Earliest-registered `Ready` worker.
    ///
    /// Non-ready workers are never picked implicitly; they only get a
    /// recovery attempt when a caller names them.
    fn default_target(&self) -> Result<String, ProxyError> {
        let earliest = |ready_only: bool| {
            self.workers
                .values()
                .filter(|w| !ready_only || w.status.is_ready())
                .min_by_key(|w| w.generation)
        };
        if let Some(ready) = earliest(true) {
            return Ok(ready.id.clone());
        }
        match earliest(false) {
            Some(entry) => Err(ProxyError::WorkerNotReady {
                id: entry.id.clone(),
                status: entry.status,
                reason: entry
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "no ready worker; name a target to retry".to_string()),
            }),
            None => Err(ProxyError::NoWorkers),
        }
    }

    /// Entry for `target`, unless it was unregistered or re-registered since.
    fn current_entry(&mut self, target: &RouteTarget) -> Option<&mut WorkerConnection> {
        self.workers
            .get_mut(&target.id)
            .filter(|w| w.generation == target.generation)
    }
}

/// A worker picked for one forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub id: String,
    pub endpoint: String,
    pub generation: u64,
    /// Status before routing; differs from `Ready` on the optimistic path.
    pub prior_status: WorkerStatus,
    /// This forward is the single optimistic recovery attempt.
    pub optimistic: bool,
    /// Entry's recovery epoch when the target was acquired.
    pub recovery_epoch: u64,
}

pub struct Registry {
    inner: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryState {
                workers: HashMap::new(),
                next_generation: 1,
            }),
        }
    }

    /// Creates or fully replaces the entry for `params.id`.
    ///
    /// Returns the new entry and whether an existing one was replaced.
    pub async fn register(&self, params: RegisterParams) -> (WorkerConnection, bool) {
        let mut state = self.inner.lock().await;
        let generation = state.next_generation;
        state.next_generation += 1;

        let entry = WorkerConnection::new(params, generation);
        let previous = state.workers.insert(entry.id.clone(), entry.clone());

        match &previous {
            Some(old) => info!(
                target: "registry",
                id = %entry.id,
                endpoint = %entry.endpoint,
                old_endpoint = %old.endpoint,
                "worker re-registered"
            ),
            None => info!(
                target: "registry",
                id = %entry.id,
                endpoint = %entry.endpoint,
                "worker registered"
            ),
        }

        (entry, previous.is_some())
    }

    /// Removes the entry if present.
    pub async fn unregister(&self, id: &str) -> bool {
        let removed = self.inner.lock().await.workers.remove(id).is_some();
        if removed {
            info!(target: "registry", id = %id, "worker unregistered");
        }
        removed
    }

    #[cfg(test)]
    pub async fn get(&self, id: &str) -> Option<WorkerConnection> {
        self.inner.lock().await.workers.get(id).cloned()
    }

    /// Snapshot of every entry in registration order.
    pub async fn list(&self) -> Vec<WorkerConnection> {
        let state = self.inner.lock().await;
        let mut workers: Vec<WorkerConnection> = state.workers.values().cloned().collect();
        workers.sort_by_key(|w| w.generation);
        workers
    }

    /// Applies an explicit heartbeat. `None` if the worker is unknown.
    pub async fn heartbeat(&self, id: &str) -> Option<WorkerConnection> {
        let mut state = self.inner.lock().await;
        let entry = state.workers.get_mut(id)?;
        let was = entry.status;
        health::record_heartbeat(entry);
        if !was.is_ready() {
            info!(target: "registry", id = %id, from = %was, "worker recovered by heartbeat");
        }
        Some(entry.clone())
    }

    /// Caller-driven status change. `None` if the worker is unknown.
    pub async fn set_status(&self, id: &str, status: WorkerStatus) -> Option<WorkerConnection> {
        let mut state = self.inner.lock().await;
        let entry = state.workers.get_mut(id)?;
        health::set_status(entry, status);
        info!(target: "registry", id = %id, status = %status, "worker status set");
        Some(entry.clone())
    }

    /// Resolves the worker for a forward and starts optimistic recovery when
    /// the worker is not `Ready`.
    pub async fn acquire_target(&self, explicit: Option<&str>) -> Result<RouteTarget, ProxyError> {
        let mut state = self.inner.lock().await;

        let id = match explicit {
            Some(id) => id.to_string(),
            None => state.default_target()?,
        };

        let entry = state
            .workers
            .get_mut(&id)
            .ok_or_else(|| ProxyError::WorkerNotFound { id: id.clone() })?;

        let prior_status = entry.status;
        let optimistic = health::begin_recovery(entry);
        if optimistic {
            info!(
                target: "registry",
                id = %id,
                from = %prior_status,
                "optimistic recovery attempt"
            );
        }

        Ok(RouteTarget {
            id,
            endpoint: entry.endpoint.clone(),
            generation: entry.generation,
            prior_status,
            optimistic,
            recovery_epoch: entry.recovery_epoch,
        })
    }

    /// Feeds a successful forward back. Returns `false` if the entry moved on.
    pub async fn record_success(&self, target: &RouteTarget) -> bool {
        let mut state = self.inner.lock().await;
        match state.current_entry(target) {
            Some(entry) => {
                health::record_success(entry);
                if target.optimistic {
                    info!(target: "registry", id = %target.id, "worker recovered");
                }
                true
            }
            None => false,
        }
    }

    /// Feeds a failed forward back. `None` if the entry moved on.
    ///
    /// A failed optimistic attempt counts as an ordinary failure when a
    /// heartbeat or successful forward landed while it was in flight.
    pub async fn record_failure(
        &self,
        target: &RouteTarget,
        reason: String,
    ) -> Option<(FailureOutcome, WorkerStatus)> {
        let mut state = self.inner.lock().await;
        let entry = state.current_entry(target)?;
        let optimistic = target.optimistic && entry.recovery_epoch == target.recovery_epoch;
        let outcome = health::record_failure(entry, reason, optimistic);

        match outcome {
            FailureOutcome::Escalated => warn!(
                target: "registry",
                id = %target.id,
                failures = entry.consecutive_failures,
                "worker stopped after consecutive failures"
            ),
            FailureOutcome::RecoveryFailed => warn!(
                target: "registry",
                id = %target.id,
                "optimistic recovery failed, worker stays stopped"
            ),
            FailureOutcome::Recorded { consecutive_failures } => warn!(
                target: "registry",
                id = %target.id,
                failures = consecutive_failures,
                "forward failed"
            ),
        }

        Some((outcome, entry.status))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
