//! Shared state handed to every request handler.

use crate::config::ProxyConfig;
use crate::proxy::registry::Registry;
use crate::proxy::router::Router;
use std::sync::Arc;
use std::time::Instant;

/// Built once per listening server and shared behind an `Arc`.
pub struct ProxyContext {
    pub registry: Arc<Registry>,
    pub router: Router,
    /// Port the listener is actually bound to.
    pub port: u16,
    pub pid: u32,
    started_at: Instant,
}

impl ProxyContext {
    pub fn new(config: &ProxyConfig, port: u16) -> Self {
        let registry = Arc::new(Registry::new());
        let router = Router::new(registry.clone(), config);
        Self {
            registry,
            router,
            port,
            pid: std::process::id(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
