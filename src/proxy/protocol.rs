//! Protocol types for the proxy.
//!
//! Clients speak JSON-RPC 2.0 over HTTP. Methods under `proxy/` are answered
//! by the proxy itself; everything else is relayed to a worker untouched.

use crate::proxy::error::ProxyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Header naming the worker a forwarded request should go to.
pub const TARGET_HEADER: &str = "x-target-id";

/// Prefix of methods handled by the proxy instead of a worker.
pub const ADMIN_PREFIX: &str = "proxy/";

/// Routing eligibility of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Selected for routing.
    #[default]
    Ready,
    /// Planned, non-error transition (e.g. hot reload). Routed like `Stopped`.
    Restarting,
    /// Failure threshold reached or explicitly stopped.
    Stopped,
}

impl WorkerStatus {
    pub fn is_ready(self) -> bool {
        self == WorkerStatus::Ready
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Ready => write!(f, "ready"),
            WorkerStatus::Restarting => write!(f, "restarting"),
            WorkerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// A registry entry for one backend worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConnection {
    pub id: String,
    /// Normalised `http://host:port/...` URL of the worker's own server.
    pub endpoint: String,
    /// Advisory only, never signalled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    pub status: WorkerStatus,
    /// Last successful contact (heartbeat or forward).
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Forwarding failures since the last success, heartbeat or registration.
    pub consecutive_failures: u32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub registered_at: DateTime<Utc>,
    /// Bumped on every registration, used to discard late forward outcomes.
    #[serde(skip)]
    pub generation: u64,
    /// Bumped on every successful contact. An optimistic attempt only
    /// reverts the worker to `Stopped` if no contact happened meanwhile.
    #[serde(skip)]
    pub recovery_epoch: u64,
}

impl WorkerConnection {
    /// Creates a fresh `Ready` entry from validated registration params.
    pub fn new(params: RegisterParams, generation: u64) -> Self {
        let now = Utc::now();
        Self {
            id: params.id,
            endpoint: params.endpoint,
            process_id: params.process_id,
            status: WorkerStatus::Ready,
            last_heartbeat: now,
            last_error: None,
            consecutive_failures: 0,
            metadata: params.metadata.unwrap_or_default(),
            registered_at: now,
            generation,
            recovery_epoch: 0,
        }
    }
}

/// `proxy/register` params.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterParams {
    pub id: String,
    pub endpoint: String,
    #[serde(default, alias = "pid")]
    pub process_id: Option<u32>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Params of methods that only name a worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerIdParams {
    pub id: String,
}

/// `proxy/set_status` params.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SetStatusParams {
    pub id: String,
    pub status: WorkerStatus,
}

/// A validated administrative call.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminRequest {
    Status,
    Register(RegisterParams),
    Unregister(WorkerIdParams),
    Heartbeat(WorkerIdParams),
    SetStatus(SetStatusParams),
}

impl AdminRequest {
    pub fn is_admin_method(method: &str) -> bool {
        method.starts_with(ADMIN_PREFIX)
    }

    /// Validates `params` against the shape required by `method`.
    pub fn parse(method: &str, params: Value) -> Result<Self, ProxyError> {
        match method {
            "proxy/status" => Ok(AdminRequest::Status),
            "proxy/register" => {
                let mut params: RegisterParams = decode_params(method, params)?;
                params.id = require_id(params.id)?;
                params.endpoint = normalize_endpoint(&params.endpoint)?;
                Ok(AdminRequest::Register(params))
            }
            "proxy/unregister" => {
                let mut params: WorkerIdParams = decode_params(method, params)?;
                params.id = require_id(params.id)?;
                Ok(AdminRequest::Unregister(params))
            }
            "proxy/heartbeat" => {
                let mut params: WorkerIdParams = decode_params(method, params)?;
                params.id = require_id(params.id)?;
                Ok(AdminRequest::Heartbeat(params))
            }
            "proxy/set_status" => {
                let mut params: SetStatusParams = decode_params(method, params)?;
                params.id = require_id(params.id)?;
                Ok(AdminRequest::SetStatus(params))
            }
            other => Err(ProxyError::MethodNotFound(other.to_string())),
        }
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Value,
) -> Result<T, ProxyError> {
    serde_json::from_value(params)
        .map_err(|e| ProxyError::InvalidParams(format!("{}: {}", method, e)))
}

fn require_id(id: String) -> Result<String, ProxyError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(ProxyError::InvalidParams("id must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Turns `host:port` or a URL into an `http(s)://` URL with a path.
pub fn normalize_endpoint(raw: &str) -> Result<String, ProxyError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ProxyError::InvalidParams(
            "endpoint must not be empty".to_string(),
        ));
    }

    let (scheme, rest) = if let Some(rest) = raw.strip_prefix("http://") {
        ("http://", rest)
    } else if let Some(rest) = raw.strip_prefix("https://") {
        ("https://", rest)
    } else if raw.contains("://") {
        return Err(ProxyError::InvalidParams(format!(
            "unsupported endpoint scheme: {}",
            raw
        )));
    } else {
        ("http://", raw)
    };

    if rest.is_empty() || rest.starts_with('/') {
        return Err(ProxyError::InvalidParams(format!(
            "endpoint has no host: {}",
            raw
        )));
    }

    if rest.contains('/') {
        Ok(format!("{}{}", scheme, rest))
    } else {
        Ok(format!("{}{}/", scheme, rest))
    }
}

/// Incoming JSON-RPC envelope. Only `method` is required.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &ProxyError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error.to_jsonrpc()),
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
