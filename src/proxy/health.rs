//! Worker health state machine.
//!
//! Pure transitions on a single registry entry. The registry applies them
//! under its lock, so every call here sees and leaves a consistent entry.
//!
//! ```text
//!   Ready --failure (count < 3)--> Ready
//!   Ready --failure (count = 3)--> Stopped
//!   Stopped/Restarting --routed to--> Ready (optimistic) --failure--> Stopped
//!   any --heartbeat--> Ready, count = 0
//!   any --success--> Ready, count = 0
//! ```

use crate::proxy::protocol::{WorkerConnection, WorkerStatus};
use chrono::Utc;

/// Consecutive forwarding failures that take a worker out of rotation.
pub const FAILURE_THRESHOLD: u32 = 3;

/// What a forwarding failure did to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still `Ready`; the failure is recorded.
    Recorded { consecutive_failures: u32 },
    /// The threshold was reached on this failure.
    Escalated,
    /// The optimistic recovery attempt failed; back to `Stopped`.
    RecoveryFailed,
}

/// Successful forward: the worker is alive.
pub fn record_success(entry: &mut WorkerConnection) {
    entry.status = WorkerStatus::Ready;
    entry.consecutive_failures = 0;
    entry.last_error = None;
    entry.last_heartbeat = Utc::now();
    entry.recovery_epoch = entry.recovery_epoch.wrapping_add(1);
}

/// Explicit heartbeat: clears failure state unconditionally.
pub fn record_heartbeat(entry: &mut WorkerConnection) {
    record_success(entry);
}

/// Failed forward. `optimistic` marks the single attempt made right after
/// [`begin_recovery`]; that attempt gets no grace period. The caller passes
/// `false` once a later contact has superseded the attempt.
pub fn record_failure(
    entry: &mut WorkerConnection,
    reason: String,
    optimistic: bool,
) -> FailureOutcome {
    entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
    entry.last_error = Some(reason);

    if optimistic {
        entry.status = WorkerStatus::Stopped;
        return FailureOutcome::RecoveryFailed;
    }

    // A concurrent request may have flipped a stopped worker back to Ready
    // with the counter already past the threshold.
    if entry.consecutive_failures >= FAILURE_THRESHOLD {
        let was_ready = entry.status.is_ready();
        entry.status = WorkerStatus::Stopped;
        if was_ready {
            return FailureOutcome::Escalated;
        }
        return FailureOutcome::RecoveryFailed;
    }

    FailureOutcome::Recorded {
        consecutive_failures: entry.consecutive_failures,
    }
}

/// Speculatively marks a non-ready worker `Ready` before routing to it.
///
/// Returns `true` when the flip happened, i.e. the caller now owns the
/// single optimistic attempt.
pub fn begin_recovery(entry: &mut WorkerConnection) -> bool {
    if entry.status.is_ready() {
        return false;
    }
    entry.status = WorkerStatus::Ready;
    true
}

/// Caller-driven status change (`proxy/set_status`).
pub fn set_status(entry: &mut WorkerConnection, status: WorkerStatus) {
    match status {
        WorkerStatus::Ready => record_heartbeat(entry),
        WorkerStatus::Restarting | WorkerStatus::Stopped => entry.status = status,
    }
}

#[cfg(test)]
#[path = "tests/health_tests.rs"]
mod tests;
