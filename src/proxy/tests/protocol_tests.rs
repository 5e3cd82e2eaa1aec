//! Tests for protocol types and admin request validation.

use super::*;
use crate::proxy::error::codes;
use serde_json::json;

#[test]
fn test_register_params_with_optional_fields() {
    let req = AdminRequest::parse(
        "proxy/register",
        json!({
            "id": "alpha",
            "endpoint": "127.0.0.1:4000",
            "processId": 4242,
            "metadata": { "project": "/src/alpha" }
        }),
    )
    .unwrap();

    match req {
        AdminRequest::Register(params) => {
            assert_eq!(params.id, "alpha");
            assert_eq!(params.endpoint, "http://127.0.0.1:4000/");
            assert_eq!(params.process_id, Some(4242));
            assert_eq!(params.metadata.unwrap()["project"], "/src/alpha");
        }
        other => panic!("Expected Register, got {:?}", other),
    }
}

#[test]
fn test_register_accepts_pid_alias() {
    let req = AdminRequest::parse(
        "proxy/register",
        json!({ "id": "a", "endpoint": "http://localhost:1/rpc", "pid": 7 }),
    )
    .unwrap();
    assert!(matches!(
        req,
        AdminRequest::Register(RegisterParams { process_id: Some(7), .. })
    ));
}

#[test]
fn test_register_missing_endpoint_is_invalid_params() {
    let err = AdminRequest::parse("proxy/register", json!({ "id": "a" })).unwrap_err();
    assert_eq!(err.code(), codes::INVALID_PARAMS);
}

#[test]
fn test_register_rejects_unknown_fields() {
    let err = AdminRequest::parse(
        "proxy/register",
        json!({ "id": "a", "endpoint": "h:1", "colour": "blue" }),
    )
    .unwrap_err();
    assert_eq!(err.code(), codes::INVALID_PARAMS);
}

#[test]
fn test_blank_id_is_invalid_params() {
    let err = AdminRequest::parse("proxy/heartbeat", json!({ "id": "   " })).unwrap_err();
    assert_eq!(err, ProxyError::InvalidParams("id must not be empty".to_string()));
}

#[test]
fn test_missing_params_is_invalid_params() {
    let err = AdminRequest::parse("proxy/unregister", Value::Null).unwrap_err();
    assert_eq!(err.code(), codes::INVALID_PARAMS);
}

#[test]
fn test_status_ignores_params() {
    assert_eq!(
        AdminRequest::parse("proxy/status", Value::Null).unwrap(),
        AdminRequest::Status
    );
}

#[test]
fn test_unknown_admin_method() {
    let err = AdminRequest::parse("proxy/explode", json!({})).unwrap_err();
    assert_eq!(err.code(), codes::METHOD_NOT_FOUND);
}

#[test]
fn test_set_status_parses_lowercase_status() {
    let req = AdminRequest::parse(
        "proxy/set_status",
        json!({ "id": "a", "status": "restarting" }),
    )
    .unwrap();
    assert_eq!(
        req,
        AdminRequest::SetStatus(SetStatusParams {
            id: "a".into(),
            status: WorkerStatus::Restarting
        })
    );

    let err = AdminRequest::parse("proxy/set_status", json!({ "id": "a", "status": "Dead" }))
        .unwrap_err();
    assert_eq!(err.code(), codes::INVALID_PARAMS);
}

#[test]
fn test_is_admin_method() {
    assert!(AdminRequest::is_admin_method("proxy/status"));
    assert!(!AdminRequest::is_admin_method("tools/call"));
    assert!(!AdminRequest::is_admin_method("proxy"));
}

#[test]
fn test_normalize_endpoint() {
    assert_eq!(normalize_endpoint("localhost:9000").unwrap(), "http://localhost:9000/");
    assert_eq!(
        normalize_endpoint(" http://10.0.0.2:80/mcp ").unwrap(),
        "http://10.0.0.2:80/mcp"
    );
    assert_eq!(normalize_endpoint("https://w.example").unwrap(), "https://w.example/");
    assert!(normalize_endpoint("").is_err());
    assert!(normalize_endpoint("http://").is_err());
    assert!(normalize_endpoint("ftp://host:21").is_err());
}

#[test]
fn test_worker_connection_wire_shape() {
    let params = RegisterParams {
        id: "w".into(),
        endpoint: "http://127.0.0.1:1/".into(),
        process_id: None,
        metadata: None,
    };
    let conn = WorkerConnection::new(params, 9);
    let value = serde_json::to_value(&conn).unwrap();

    assert_eq!(value["status"], "ready");
    assert_eq!(value["consecutiveFailures"], 0);
    assert!(value["lastError"].is_null());
    assert!(value.get("processId").is_none());
    assert!(value.get("generation").is_none());
    assert!(value["lastHeartbeat"].is_string());
}

#[test]
fn test_request_envelope_defaults() {
    let req: JsonRpcRequest = serde_json::from_str(r#"{"method":"tools/list"}"#).unwrap();
    assert_eq!(req.id, Value::Null);
    assert_eq!(req.params, Value::Null);
    assert!(req.jsonrpc.is_none());
}

#[test]
fn test_failure_response_omits_result() {
    let resp = JsonRpcResponse::failure(json!(3), &ProxyError::NoWorkers);
    let value = serde_json::to_value(&resp).unwrap();
    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["id"], 3);
    assert_eq!(value["error"]["code"], codes::NO_WORKERS);
    assert!(value.get("result").is_none());
}
