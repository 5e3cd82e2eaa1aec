//! Request routing core.
//!
//! ## Architecture
//!
//! - **Registry (`registry.rs`)**: worker id to connection state, one lock.
//! - **Health (`health.rs`)**: failure counting, escalation and recovery.
//! - **Router (`router.rs`)**: target selection and a single forward per request.
//! - **Dispatch (`dispatch.rs`)**: liveness probe, `proxy/*` calls, or routing.
//! - **Protocol (`protocol.rs`)**: JSON-RPC envelope and worker records.

pub mod admin;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod health;
pub mod protocol;
pub mod registry;
pub mod router;

pub use context::ProxyContext;
