//! Error taxonomy for the proxy.
//!
//! Every variant maps to a stable JSON-RPC error code and an HTTP status.
//! Client libraries match on the codes, so they must never change.

use crate::proxy::protocol::{JsonRpcError, WorkerStatus};
use axum::http::StatusCode;
use serde_json::json;

/// Stable JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const NO_WORKERS: i32 = -32001;
    pub const WORKER_NOT_FOUND: i32 = -32002;
    pub const WORKER_NOT_READY: i32 = -32003;
    pub const FORWARD_FAILED: i32 = -32004;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("No workers registered")]
    NoWorkers,

    #[error("No such worker: {id}")]
    WorkerNotFound { id: String },

    #[error("Worker {id} not ready (status: {status})")]
    WorkerNotReady {
        id: String,
        status: WorkerStatus,
        reason: String,
    },

    #[error("Forwarding to worker {id} failed: {reason}")]
    ForwardFailed { id: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn code(&self) -> i32 {
        match self {
            ProxyError::Parse(_) => codes::PARSE_ERROR,
            ProxyError::InvalidRequest(_) => codes::INVALID_REQUEST,
            ProxyError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            ProxyError::InvalidParams(_) => codes::INVALID_PARAMS,
            ProxyError::NoWorkers => codes::NO_WORKERS,
            ProxyError::WorkerNotFound { .. } => codes::WORKER_NOT_FOUND,
            ProxyError::WorkerNotReady { .. } => codes::WORKER_NOT_READY,
            ProxyError::ForwardFailed { .. } => codes::FORWARD_FAILED,
            ProxyError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ProxyError::Parse(_) | ProxyError::InvalidRequest(_) | ProxyError::InvalidParams(_) => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::MethodNotFound(_) | ProxyError::WorkerNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ProxyError::NoWorkers | ProxyError::WorkerNotReady { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::ForwardFailed { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller mistakes, as opposed to worker or proxy trouble.
    pub fn is_client_error(&self) -> bool {
        self.http_status().is_client_error()
    }

    pub fn to_jsonrpc(&self) -> JsonRpcError {
        let data = match self {
            ProxyError::WorkerNotFound { id } => Some(json!({ "id": id })),
            ProxyError::WorkerNotReady { id, status, reason } => {
                Some(json!({ "id": id, "status": status, "reason": reason }))
            }
            ProxyError::ForwardFailed { id, reason } => {
                Some(json!({ "id": id, "reason": reason }))
            }
            _ => None,
        };
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data,
        }
    }
}
