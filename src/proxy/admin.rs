//! Handlers for `proxy/*` methods and the liveness probe.

use crate::proxy::context::ProxyContext;
use crate::proxy::error::ProxyError;
use crate::proxy::protocol::{AdminRequest, WorkerConnection};
use serde_json::{json, Value};

/// Git commit the binary was built from.
pub const BUILD_SHA: &str = env!("WORKER_PROXY_GIT_SHA");

/// Fixed answer to an empty request body.
pub fn health_payload(ctx: &ProxyContext) -> Value {
    json!({
        "status": "ok",
        "pid": ctx.pid,
        "uptime_secs": ctx.uptime_secs(),
    })
}

pub async fn handle(ctx: &ProxyContext, request: AdminRequest) -> Result<Value, ProxyError> {
    match request {
        AdminRequest::Status => {
            let workers = ctx.registry.list().await;
            Ok(json!({
                "pid": ctx.pid,
                "port": ctx.port,
                "uptime_secs": ctx.uptime_secs(),
                "build_sha": BUILD_SHA,
                "workers": workers,
            }))
        }

        AdminRequest::Register(params) => {
            let (entry, replaced) = ctx.registry.register(params).await;
            Ok(json!({ "id": entry.id, "replaced": replaced }))
        }

        AdminRequest::Unregister(params) => {
            let removed = ctx.registry.unregister(&params.id).await;
            Ok(json!({ "id": params.id, "removed": removed }))
        }

        AdminRequest::Heartbeat(params) => match ctx.registry.heartbeat(&params.id).await {
            Some(entry) => entry_value(&entry),
            None => Err(ProxyError::WorkerNotFound { id: params.id }),
        },

        AdminRequest::SetStatus(params) => {
            match ctx.registry.set_status(&params.id, params.status).await {
                Some(entry) => entry_value(&entry),
                None => Err(ProxyError::WorkerNotFound { id: params.id }),
            }
        }
    }
}

fn entry_value(entry: &WorkerConnection) -> Result<Value, ProxyError> {
    serde_json::to_value(entry).map_err(|e| ProxyError::Internal(e.to_string()))
}
