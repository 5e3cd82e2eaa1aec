//! Tests for the worker registry.

use super::*;
use serde_json::json;
use std::sync::Arc;

fn params(id: &str, endpoint: &str) -> RegisterParams {
    RegisterParams {
        id: id.to_string(),
        endpoint: endpoint.to_string(),
        process_id: None,
        metadata: None,
    }
}

#[tokio::test]
async fn test_register_creates_ready_entry() {
    let registry = Registry::new();

    let (entry, replaced) = registry.register(params("a", "http://127.0.0.1:1/")).await;

    assert!(!replaced);
    assert_eq!(entry.status, WorkerStatus::Ready);
    assert_eq!(entry.consecutive_failures, 0);
    assert_eq!(registry.get("a").await, Some(entry));
}

#[tokio::test]
async fn test_reregister_replaces_everything() {
    let registry = Registry::new();
    registry.register(params("a", "http://127.0.0.1:1/")).await;

    let target = registry.acquire_target(Some("a")).await.unwrap();
    for _ in 0..3 {
        registry.record_failure(&target, "down".into()).await;
    }
    assert_eq!(registry.get("a").await.unwrap().status, WorkerStatus::Stopped);

    let mut fresh = params("a", "http://127.0.0.1:2/");
    fresh.metadata = json!({ "v": 2 }).as_object().cloned();
    let (entry, replaced) = registry.register(fresh).await;

    assert!(replaced);
    assert_eq!(entry.endpoint, "http://127.0.0.1:2/");
    assert_eq!(entry.status, WorkerStatus::Ready);
    assert_eq!(entry.consecutive_failures, 0);
    assert!(entry.last_error.is_none());
    assert_eq!(entry.metadata["v"], 2);
    assert_eq!(registry.list().await.len(), 1);
}

#[tokio::test]
async fn test_unregister_is_noop_for_unknown() {
    let registry = Registry::new();
    registry.register(params("a", "http://127.0.0.1:1/")).await;

    assert!(!registry.unregister("missing").await);
    assert!(registry.unregister("a").await);
    assert!(registry.list().await.is_empty());
    assert!(registry.get("a").await.is_none());
}

#[tokio::test]
async fn test_list_is_in_registration_order() {
    let registry = Registry::new();
    for id in ["c", "a", "b"] {
        registry.register(params(id, "http://127.0.0.1:1/")).await;
    }

    let ids: Vec<String> = registry.list().await.into_iter().map(|w| w.id).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn test_acquire_without_workers() {
    let registry = Registry::new();

    assert_eq!(registry.acquire_target(None).await, Err(ProxyError::NoWorkers));
    assert_eq!(
        registry.acquire_target(Some("ghost")).await,
        Err(ProxyError::WorkerNotFound { id: "ghost".into() })
    );
}

#[tokio::test]
async fn test_default_target_prefers_earliest_ready() {
    let registry = Registry::new();
    registry.register(params("first", "http://127.0.0.1:1/")).await;
    registry.register(params("second", "http://127.0.0.1:2/")).await;

    assert_eq!(registry.acquire_target(None).await.unwrap().id, "first");

    registry.set_status("first", WorkerStatus::Restarting).await;
    let target = registry.acquire_target(None).await.unwrap();
    assert_eq!(target.id, "second");
    assert!(!target.optimistic);
}

#[tokio::test]
async fn test_default_target_skips_non_ready() {
    let registry = Registry::new();
    registry.register(params("only", "http://127.0.0.1:1/")).await;
    registry.set_status("only", WorkerStatus::Stopped).await;

    let err = registry.acquire_target(None).await.unwrap_err();

    match err {
        ProxyError::WorkerNotReady { id, status, .. } => {
            assert_eq!(id, "only");
            assert_eq!(status, WorkerStatus::Stopped);
        }
        other => panic!("Expected WorkerNotReady, got {:?}", other),
    }
    assert_eq!(registry.get("only").await.unwrap().status, WorkerStatus::Stopped);
}

#[tokio::test]
async fn test_default_target_reports_earliest_non_ready() {
    let registry = Registry::new();
    registry.register(params("first", "http://127.0.0.1:1/")).await;
    registry.register(params("second", "http://127.0.0.1:2/")).await;
    registry.set_status("second", WorkerStatus::Stopped).await;
    registry.set_status("first", WorkerStatus::Restarting).await;

    let err = registry.acquire_target(None).await.unwrap_err();

    assert!(matches!(
        err,
        ProxyError::WorkerNotReady { ref id, status: WorkerStatus::Restarting, .. } if id == "first"
    ));
}

async fn stopped_then_optimistic(registry: &Registry) -> RouteTarget {
    registry.register(params("a", "http://127.0.0.1:1/")).await;
    let target = registry.acquire_target(Some("a")).await.unwrap();
    for _ in 0..3 {
        registry.record_failure(&target, "down".into()).await;
    }
    let attempt = registry.acquire_target(Some("a")).await.unwrap();
    assert!(attempt.optimistic);
    attempt
}

#[tokio::test]
async fn test_heartbeat_during_recovery_attempt_wins() {
    let registry = Registry::new();
    let attempt = stopped_then_optimistic(&registry).await;

    registry.heartbeat("a").await.unwrap();
    let outcome = registry.record_failure(&attempt, "late".into()).await;

    assert_eq!(
        outcome,
        Some((
            FailureOutcome::Recorded { consecutive_failures: 1 },
            WorkerStatus::Ready
        ))
    );
    let entry = registry.get("a").await.unwrap();
    assert_eq!(entry.status, WorkerStatus::Ready);
    assert_eq!(entry.consecutive_failures, 1);
}

#[tokio::test]
async fn test_success_during_recovery_attempt_wins() {
    let registry = Registry::new();
    let attempt = stopped_then_optimistic(&registry).await;

    // A second request, routed while the worker was flipped to Ready.
    let concurrent = registry.acquire_target(Some("a")).await.unwrap();
    assert!(!concurrent.optimistic);
    assert!(registry.record_success(&concurrent).await);
    let outcome = registry.record_failure(&attempt, "late".into()).await;

    assert_eq!(
        outcome,
        Some((
            FailureOutcome::Recorded { consecutive_failures: 1 },
            WorkerStatus::Ready
        ))
    );
    assert_eq!(registry.get("a").await.unwrap().status, WorkerStatus::Ready);
}

#[tokio::test]
async fn test_failed_recovery_attempt_without_contact_stops_worker() {
    let registry = Registry::new();
    let attempt = stopped_then_optimistic(&registry).await;

    let outcome = registry.record_failure(&attempt, "still down".into()).await;

    assert_eq!(
        outcome,
        Some((FailureOutcome::RecoveryFailed, WorkerStatus::Stopped))
    );
}

#[tokio::test]
async fn test_heartbeat_unknown_worker() {
    let registry = Registry::new();
    assert!(registry.heartbeat("nope").await.is_none());
    assert!(registry.set_status("nope", WorkerStatus::Ready).await.is_none());
}

#[tokio::test]
async fn test_stale_outcome_is_discarded_after_reregistration() {
    let registry = Registry::new();
    registry.register(params("a", "http://127.0.0.1:1/")).await;
    let stale = registry.acquire_target(Some("a")).await.unwrap();

    registry.register(params("a", "http://127.0.0.1:2/")).await;

    assert!(registry.record_failure(&stale, "late".into()).await.is_none());
    assert!(!registry.record_success(&stale).await);
    let entry = registry.get("a").await.unwrap();
    assert_eq!(entry.consecutive_failures, 0);
    assert!(entry.last_error.is_none());
}

#[tokio::test]
async fn test_concurrent_failures_are_not_lost() {
    let registry = Arc::new(Registry::new());
    registry.register(params("a", "http://127.0.0.1:1/")).await;
    let target = registry.acquire_target(Some("a")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..2 {
        let registry = registry.clone();
        let target = target.clone();
        handles.push(tokio::spawn(async move {
            registry.record_failure(&target, format!("e{}", i)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let entry = registry.get("a").await.unwrap();
    assert_eq!(entry.consecutive_failures, 2);
    assert_eq!(entry.status, WorkerStatus::Ready);
}
