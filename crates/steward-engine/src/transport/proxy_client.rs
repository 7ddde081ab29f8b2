use std::time::Duration;

use serde_json::Value;
use steward_config::MAX_TRANSPORT_TIMEOUT_MS;
use steward_contracts::DecisionRequest;
use tracing::debug;

use super::{check_echo, DecisionExecutor, TransportError};

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Posts requests to a replay proxy's `/decide`.
#[derive(Debug, Clone)]
pub struct ProxyExecutor {
    client: reqwest::Client,
    url: String,
    timeout_ms: u64,
}

impl ProxyExecutor {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| TransportError::Http(err.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/decide", base_url.trim_end_matches('/')),
            timeout_ms,
        })
    }

    /// Per-request budget: the configured timeout, capped by the hard maximum and
    /// by the request's own ttl.
    pub fn effective_timeout_ms(&self, request: &DecisionRequest) -> u64 {
        MAX_TRANSPORT_TIMEOUT_MS
            .min(self.timeout_ms)
            .min(request.ttl_ms)
            .max(1)
    }
}

impl DecisionExecutor for ProxyExecutor {
    async fn execute(&self, request: DecisionRequest) -> Result<Value, TransportError> {
        let timeout_ms = self.effective_timeout_ms(&request);
        let classify = |err: reqwest::Error| {
            if err.is_timeout() {
                TransportError::Timeout(timeout_ms)
            } else {
                TransportError::Http(err.to_string())
            }
        };

        let resp = self
            .client
            .post(&self.url)
            .timeout(Duration::from_millis(timeout_ms))
            .json(&request.to_body())
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let body: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(classify)?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|err| TransportError::Decode(err.to_string()))?;
        check_echo(&request, &value)?;
        debug!(
            request_id = %request.request_id,
            agent_id = %request.agent_id,
            bytes = bytes.len(),
            "proxy decision received"
        );
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::request;

    #[test]
    fn timeout_is_capped_by_ttl_and_maximum() {
        let exec = ProxyExecutor::new("http://127.0.0.1:1/", 30_000).unwrap();
        let mut req = request("a", "r1");
        assert_eq!(exec.effective_timeout_ms(&req), 10_000);
        req.ttl_ms = 1_500;
        assert_eq!(exec.effective_timeout_ms(&req), 1_500);
        assert_eq!(exec.url, "http://127.0.0.1:1/decide");
    }
}
