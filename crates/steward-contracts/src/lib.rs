use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION: u32 = 1;
pub const MAX_TTL_MS: u64 = 120_000;
pub const NEARBY_LIMIT: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Needs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hunger: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anxiety: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggression: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyAgent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Minimal, world-independent snapshot handed to a decision provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideContext {
    pub agent_id: String,
    pub room_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs: Option<Needs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearby_agents: Option<Vec<NearbyAgent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooms: Option<Vec<RoomRef>>,
    pub allowlist_actions: Vec<String>,
}

/// The `request` half of the `/decide` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub request_id: String,
    pub agent_id: String,
    pub intent_id: String,
    pub context_hash: String,
    pub created_at_ms: u64,
    pub prompt_version: String,
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideBody {
    pub request: RequestMeta,
    pub context: DecideContext,
}

/// A request for one decision, minted by the scheduler.
///
/// `intent_id` is `agent_id + ":" + context_hash` and names the situation being
/// decided; `request_id` names the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub request_id: String,
    pub agent_id: String,
    pub intent_id: String,
    pub context_hash: String,
    pub created_at_ms: u64,
    pub prompt_version: String,
    pub ttl_ms: u64,
    pub context: DecideContext,
}

impl DecisionRequest {
    pub fn meta(&self) -> RequestMeta {
        RequestMeta {
            request_id: self.request_id.clone(),
            agent_id: self.agent_id.clone(),
            intent_id: self.intent_id.clone(),
            context_hash: self.context_hash.clone(),
            created_at_ms: self.created_at_ms,
            prompt_version: self.prompt_version.clone(),
            ttl_ms: self.ttl_ms,
        }
    }

    pub fn to_body(&self) -> DecideBody {
        DecideBody {
            request: self.meta(),
            context: self.context.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPoint {
    pub x: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDecision {
    pub agent_id: String,
    pub tick_planned: u64,
    pub action: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_point: Option<TargetPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResult {
    pub request_id: String,
    pub agent_id: String,
    pub intent_id: String,
    pub context_hash: String,
    pub created_at_ms: u64,
    pub schema_version: u32,
    pub decision: AgentDecision,
}

impl DecisionResult {
    /// Builds a result that echoes the identity fields of `request`.
    pub fn for_request(request: &RequestMeta, created_at_ms: u64, decision: AgentDecision) -> Self {
        Self {
            request_id: request.request_id.clone(),
            agent_id: request.agent_id.clone(),
            intent_id: request.intent_id.clone(),
            context_hash: request.context_hash.clone(),
            created_at_ms,
            schema_version: SCHEMA_VERSION,
            decision,
        }
    }
}

/// Externally submitted user/manual command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

pub fn intent_id(agent_id: &str, context_hash: &str) -> String {
    format!("{agent_id}:{context_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::path::PathBuf;

    #[test]
    fn schema_files_are_valid_json_schema() {
        let dir = repo_path("contracts/v1");
        let entries = std::fs::read_dir(dir).unwrap();
        for entry in entries {
            let path = entry.unwrap().path();
            if !path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(".schema.json"))
                .unwrap_or(false)
            {
                continue;
            }
            let text = std::fs::read_to_string(&path).unwrap();
            let schema: Value = serde_json::from_str(&text).unwrap();
            let _validator = jsonschema::validator_for(&schema)
                .unwrap_or_else(|err| panic!("invalid schema {}: {err}", path.display()));
        }
    }

    #[test]
    fn decide_body_matches_request_schema() {
        let body = sample_request().to_body();
        let instance = serde_json::to_value(&body).unwrap();
        assert_valid("contracts/v1/decide-request.schema.json", &instance);
        assert_eq!(instance["request"]["requestId"], "req-1");
        assert!(instance["context"].get("needs").is_none());
    }

    #[test]
    fn result_matches_result_schema() {
        let req = sample_request();
        let result = DecisionResult::for_request(
            &req.meta(),
            7,
            AgentDecision {
                agent_id: "a1".to_string(),
                tick_planned: 0,
                action: "WANDER".to_string(),
                reason: "fallback".to_string(),
                target_room_id: None,
                target_agent_id: None,
                target_point: Some(TargetPoint { x: 1.5, z: -2.0 }),
            },
        );
        let instance = serde_json::to_value(&result).unwrap();
        assert_valid("contracts/v1/decision-result.schema.json", &instance);
        assert_eq!(instance["schemaVersion"], json!(1));
        assert_eq!(instance["intentId"], "a1:abc");
    }

    #[test]
    fn command_type_field_is_renamed() {
        let cmd: Command = serde_json::from_value(json!({
            "id": "c1",
            "type": "MOVE_TO_ROOM",
            "createdAtMs": 5,
            "payload": {"agentId": "a1", "roomId": "r2"}
        }))
        .unwrap();
        assert_eq!(cmd.kind, "MOVE_TO_ROOM");
        assert_eq!(cmd.actor_id, None);
    }

    fn sample_request() -> DecisionRequest {
        DecisionRequest {
            request_id: "req-1".to_string(),
            agent_id: "a1".to_string(),
            intent_id: intent_id("a1", "abc"),
            context_hash: "abc".to_string(),
            created_at_ms: 1_700_000_000_000,
            prompt_version: "v1".to_string(),
            ttl_ms: 20_000,
            context: DecideContext {
                agent_id: "a1".to_string(),
                room_id: "r1".to_string(),
                state: "IDLE".to_string(),
                needs: None,
                nearby_agents: None,
                rooms: None,
                allowlist_actions: vec!["IDLE".to_string(), "WANDER".to_string()],
            },
        }
    }

    fn assert_valid(schema_rel: &str, instance: &Value) {
        let text = std::fs::read_to_string(repo_path(schema_rel)).unwrap();
        let schema: Value = serde_json::from_str(&text).unwrap();
        let validator = jsonschema::validator_for(&schema).unwrap();
        if let Err(err) = validator.validate(instance) {
            panic!("{schema_rel} rejected {instance}: {err}");
        }
    }

    fn repo_path(relative: &str) -> PathBuf {
        let mut base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        base.push("../..");
        base.push(relative);
        base
    }
}
