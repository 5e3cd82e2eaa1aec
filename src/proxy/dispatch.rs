//! Request dispatch: liveness probe, `proxy/*` methods, or forwarding.
//!
//! Every request that reaches this point gets a well-formed JSON-RPC answer.

use crate::proxy::admin;
use crate::proxy::context::ProxyContext;
use crate::proxy::error::ProxyError;
use crate::proxy::protocol::{AdminRequest, JsonRpcRequest, JsonRpcResponse};
use axum::body::Bytes;
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Status and JSON body to send back.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

const FALLBACK_ERROR: &[u8] =
    br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

impl Reply {
    fn json<T: Serialize>(status: StatusCode, payload: &T) -> Self {
        match serde_json::to_vec(payload) {
            Ok(body) => Self { status, body },
            Err(e) => {
                error!(target: "dispatch", error = %e, "failed to serialize response");
                let err = ProxyError::Internal("failed to serialize response".into());
                Self::error(Value::Null, &err)
            }
        }
    }

    /// Error envelope; also logs by failure class.
    pub fn error(id: Value, err: &ProxyError) -> Self {
        match err {
            ProxyError::Internal(_) => error!(target: "dispatch", error = %err, "internal error"),
            _ if err.is_client_error() => {
                debug!(target: "dispatch", error = %err, "rejected request")
            }
            _ => warn!(target: "dispatch", error = %err, "request failed"),
        }
        let body = serde_json::to_vec(&JsonRpcResponse::failure(id, err))
            .unwrap_or_else(|_| FALLBACK_ERROR.to_vec());
        Self {
            status: err.http_status(),
            body,
        }
    }
}

/// Handles one request body. `target` comes from the target-id header.
pub async fn dispatch(ctx: &ProxyContext, target: Option<&str>, body: Bytes) -> Reply {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Reply::json(StatusCode::OK, &admin::health_payload(ctx));
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return Reply::error(Value::Null, &ProxyError::Parse(e.to_string())),
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);

    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => return Reply::error(id, &ProxyError::InvalidRequest(e.to_string())),
    };

    if AdminRequest::is_admin_method(&request.method) {
        let outcome = match AdminRequest::parse(&request.method, request.params) {
            Ok(admin_request) => admin::handle(ctx, admin_request).await,
            Err(e) => Err(e),
        };
        return match outcome {
            Ok(result) => Reply::json(StatusCode::OK, &JsonRpcResponse::success(id, result)),
            Err(e) => Reply::error(id, &e),
        };
    }

    match ctx.router.route(body, target).await {
        Ok(response) => Reply {
            status: StatusCode::OK,
            body: response,
        },
        Err(e) => Reply::error(id, &e),
    }
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
