//! Outbound HTTP forwarding to workers.
//!
//! `ureq` is blocking, so each forward runs on the blocking pool. Connect and
//! total timeouts are set on the agent; expiry surfaces like any transport error.

use crate::config::ProxyConfig;
use axum::body::Bytes;

/// Largest worker response body passed through.
pub const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct Forwarder {
    agent: ureq::Agent,
    max_error_len: usize,
}

impl Forwarder {
    pub fn new(config: &ProxyConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_connect(Some(config.connect_timeout))
            .timeout_global(Some(config.request_timeout))
            .proxy(None)
            .build()
            .into();
        Self {
            agent,
            max_error_len: config.max_error_len,
        }
    }

    /// POSTs `body` verbatim to `endpoint` and returns the worker's response body.
    ///
    /// Any transport error, timeout or non-2xx status is an `Err` carrying a
    /// reason cut to the configured length. Never retries.
    pub async fn forward(&self, endpoint: &str, body: Bytes) -> Result<Vec<u8>, String> {
        let agent = self.agent.clone();
        let url = endpoint.to_string();

        let outcome = tokio::task::spawn_blocking(move || post_json(&agent, &url, &body)).await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(reason)) => Err(truncate_reason(&reason, self.max_error_len)),
            Err(e) => Err(truncate_reason(
                &format!("forward task failed: {}", e),
                self.max_error_len,
            )),
        }
    }
}

fn post_json(agent: &ureq::Agent, url: &str, body: &[u8]) -> Result<Vec<u8>, String> {
    let mut response = agent
        .post(url)
        .header("Content-Type", "application/json")
        .send(body)
        .map_err(describe_error)?;

    response
        .body_mut()
        .with_config()
        .limit(MAX_RESPONSE_BYTES)
        .read_to_vec()
        .map_err(describe_error)
}

fn describe_error(err: ureq::Error) -> String {
    match err {
        ureq::Error::StatusCode(code) => format!("worker returned HTTP {}", code),
        other => other.to_string(),
    }
}

/// Cuts `reason` to at most `max_len` characters, marking the cut.
pub fn truncate_reason(reason: &str, max_len: usize) -> String {
    if reason.chars().count() <= max_len {
        return reason.to_string();
    }
    let mut cut: String = reason.chars().take(max_len.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
