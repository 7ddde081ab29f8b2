//! Boundary to whatever produces decisions.
//!
//! An executor sees only the [`DecisionRequest`]; it never touches the world.
//! Results travel back as raw JSON through the runtime's decision buffer and are
//! validated by the tick pipeline.

use std::future::Future;

use serde_json::Value;
use steward_contracts::{DecisionRequest, DecisionResult};
use steward_kernel::{l0_decide, L0WorldMap, DEFAULT_L0_WORLD_MAP};
use thiserror::Error;

pub mod deterministic;
pub mod proxy_client;
pub mod worker;

pub use deterministic::DeterministicWorker;
pub use proxy_client::ProxyExecutor;
pub use worker::{start_decision_worker, SharedRuntime, WorkerHandle};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("proxy_timeout after {0}ms")]
    Timeout(u64),
    #[error("proxy transport error: {0}")]
    Http(String),
    #[error("proxy {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed decision result: {0}")]
    Decode(String),
    #[error("decision result does not echo request: {0}")]
    EchoMismatch(String),
}

pub trait DecisionExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        request: DecisionRequest,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;
}

/// Confirms `result` carries the identity fields of `request`.
pub fn check_echo(request: &DecisionRequest, result: &Value) -> Result<(), TransportError> {
    let field = |name: &str| result.get(name).and_then(Value::as_str);
    for (name, expected) in [
        ("requestId", request.request_id.as_str()),
        ("agentId", request.agent_id.as_str()),
        ("intentId", request.intent_id.as_str()),
        ("contextHash", request.context_hash.as_str()),
    ] {
        match field(name) {
            Some(actual) if actual == expected => {}
            Some(actual) => {
                return Err(TransportError::EchoMismatch(format!(
                    "{name}: expected {expected}, got {actual}"
                )))
            }
            None => return Err(TransportError::Decode(format!("missing {name}"))),
        }
    }
    Ok(())
}

/// Runs the L0 brain for `request`, stamping the result with `created_at_ms`.
pub fn local_brain_result(
    request: &DecisionRequest,
    seed: u64,
    map: &L0WorldMap,
    created_at_ms: u64,
) -> DecisionResult {
    let decision = l0_decide(
        &request.request_id,
        &request.agent_id,
        &request.context,
        seed,
        map,
    );
    DecisionResult::for_request(&request.meta(), created_at_ms, decision)
}

/// In-process executor backed by the L0 brain.
#[derive(Debug, Clone)]
pub struct LocalBrainExecutor {
    pub seed: u64,
    pub map: L0WorldMap,
}

impl LocalBrainExecutor {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            map: DEFAULT_L0_WORLD_MAP,
        }
    }
}

impl DecisionExecutor for LocalBrainExecutor {
    async fn execute(&self, request: DecisionRequest) -> Result<Value, TransportError> {
        let result = local_brain_result(&request, self.seed, &self.map, steward_kernel::now_ms());
        serde_json::to_value(result).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use steward_contracts::{DecideContext, DecisionRequest, Needs};

    pub fn request(agent: &str, request_id: &str) -> DecisionRequest {
        DecisionRequest {
            request_id: request_id.to_string(),
            agent_id: agent.to_string(),
            intent_id: format!("{agent}:h"),
            context_hash: "h".to_string(),
            created_at_ms: 1_000,
            prompt_version: "l0-v1".to_string(),
            ttl_ms: 20_000,
            context: DecideContext {
                agent_id: agent.to_string(),
                room_id: "r3".to_string(),
                state: "IDLE".to_string(),
                needs: Some(Needs {
                    energy: Some(0.9),
                    hunger: Some(0.1),
                    anxiety: None,
                    aggression: None,
                }),
                nearby_agents: None,
                rooms: None,
                allowlist_actions: vec!["IDLE".to_string(), "WANDER".to_string()],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::request;
    use super::*;
    use serde_json::json;

    #[test]
    fn echo_check_names_the_field() {
        let req = request("a", "r1");
        let good = json!({
            "requestId": "r1", "agentId": "a", "intentId": "a:h", "contextHash": "h"
        });
        assert!(check_echo(&req, &good).is_ok());

        let bad = json!({"requestId": "r2", "agentId": "a", "intentId": "a:h", "contextHash": "h"});
        let err = check_echo(&req, &bad).unwrap_err();
        assert!(matches!(err, TransportError::EchoMismatch(_)));
        assert!(err.to_string().contains("requestId"));

        let missing = json!({"requestId": "r1"});
        assert!(matches!(check_echo(&req, &missing), Err(TransportError::Decode(_))));
    }

    #[test]
    fn timeout_error_is_distinguishable() {
        assert_eq!(TransportError::Timeout(250).to_string(), "proxy_timeout after 250ms");
    }

    #[tokio::test]
    async fn local_brain_echoes_identity() {
        let req = request("a", "r1");
        let value = LocalBrainExecutor::new(3).execute(req.clone()).await.unwrap();
        check_echo(&req, &value).unwrap();
        assert_eq!(value["decision"]["action"], "WANDER");
        assert_eq!(value["schemaVersion"], 1);
    }
}
