use serde_json::{Map, Value};
use steward_contracts::{
    AgentDecision, DecideBody, DecideContext, DecisionResult, NearbyAgent, Needs, RequestMeta,
    RoomRef, MAX_TTL_MS, NEARBY_LIMIT,
};
use steward_kernel::{clamp01, fallback_action, round2};

/// A checked `/decide` body plus a safe result to fall back on.
#[derive(Debug, Clone)]
pub struct ValidatedDecide {
    pub body: DecideBody,
    pub fallback: DecisionResult,
}

/// Checks and normalises a raw `/decide` body.
///
/// Optional context lists are cleaned rather than rejected: entries without an
/// id are dropped, rooms are sorted by id, nearby agents by distance then id
/// and capped, needs clamped to [0, 1] and rounded to two decimals.
pub fn validate_decide(raw: &[u8], now_ms: u64) -> Result<ValidatedDecide, String> {
    let body: Value = serde_json::from_slice(raw).map_err(|_| "invalid body".to_string())?;
    let body = body.as_object().ok_or_else(|| "invalid body".to_string())?;
    let request = body
        .get("request")
        .and_then(Value::as_object)
        .ok_or_else(|| "invalid request".to_string())?;
    let context = body
        .get("context")
        .and_then(Value::as_object)
        .ok_or_else(|| "invalid context".to_string())?;

    let meta = RequestMeta {
        request_id: required_str(request, "requestId", "request")?,
        agent_id: required_str(request, "agentId", "request")?,
        intent_id: required_str(request, "intentId", "request")?,
        context_hash: required_str(request, "contextHash", "request")?,
        created_at_ms: required_ms(request, "createdAtMs", "request")?,
        prompt_version: required_str(request, "promptVersion", "request")?,
        ttl_ms: required_ms(request, "ttlMs", "request")?,
    };
    if meta.ttl_ms == 0 || meta.ttl_ms > MAX_TTL_MS {
        return Err("invalid request.ttlMs".to_string());
    }

    let allowlist_actions = allowlist(context.get("allowlistActions"))?;
    let ctx = DecideContext {
        agent_id: required_str(context, "agentId", "context")?,
        room_id: required_str(context, "roomId", "context")?,
        state: required_str(context, "state", "context")?,
        needs: context.get("needs").and_then(Value::as_object).map(needs),
        nearby_agents: context
            .get("nearbyAgents")
            .and_then(Value::as_array)
            .map(|v| nearby_agents(v)),
        rooms: context.get("rooms").and_then(Value::as_array).map(|v| rooms(v)),
        allowlist_actions,
    };

    if meta.agent_id != ctx.agent_id {
        return Err("request.agentId != context.agentId".to_string());
    }

    let fallback = DecisionResult::for_request(
        &meta,
        now_ms,
        AgentDecision {
            agent_id: meta.agent_id.clone(),
            tick_planned: 0,
            action: fallback_action(&ctx.allowlist_actions),
            reason: "fallback".to_string(),
            target_room_id: None,
            target_agent_id: None,
            target_point: None,
        },
    );
    Ok(ValidatedDecide {
        body: DecideBody {
            request: meta,
            context: ctx,
        },
        fallback,
    })
}

fn required_str(obj: &Map<String, Value>, key: &str, scope: &str) -> Result<String, String> {
    match obj.get(key).and_then(Value::as_str) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(format!("invalid {scope}.{key}")),
    }
}

fn required_ms(obj: &Map<String, Value>, key: &str, scope: &str) -> Result<u64, String> {
    match obj.get(key).and_then(Value::as_f64) {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v.trunc() as u64),
        _ => Err(format!("invalid {scope}.{key}")),
    }
}

fn allowlist(value: Option<&Value>) -> Result<Vec<String>, String> {
    let items = value
        .and_then(Value::as_array)
        .ok_or_else(|| "invalid context.allowlistActions".to_string())?;
    if items.is_empty() {
        return Err("empty context.allowlistActions".to_string());
    }
    items
        .iter()
        .enumerate()
        .map(|(i, v)| match v.as_str() {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(format!("invalid context.allowlistActions[{i}]")),
        })
        .collect()
}

fn need(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .map(|v| round2(clamp01(v)))
}

fn needs(obj: &Map<String, Value>) -> Needs {
    Needs {
        energy: need(obj, "energy"),
        hunger: need(obj, "hunger"),
        anxiety: need(obj, "anxiety"),
        aggression: need(obj, "aggression"),
    }
}

fn opt_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn nearby_agents(items: &[Value]) -> Vec<NearbyAgent> {
    let mut out: Vec<NearbyAgent> = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|a| {
            let id = opt_str(a, "id").filter(|id| !id.is_empty())?;
            Some(NearbyAgent {
                id,
                role: opt_str(a, "role"),
                dist: a
                    .get("dist")
                    .and_then(Value::as_f64)
                    .filter(|d| d.is_finite())
                    .map(round2),
                state: opt_str(a, "state"),
            })
        })
        .collect();
    out.sort_by(|a, b| {
        a.dist
            .unwrap_or(0.0)
            .total_cmp(&b.dist.unwrap_or(0.0))
            .then_with(|| a.id.cmp(&b.id))
    });
    out.truncate(NEARBY_LIMIT);
    out
}

fn rooms(items: &[Value]) -> Vec<RoomRef> {
    let mut out: Vec<RoomRef> = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|r| {
            let id = opt_str(r, "id").filter(|id| !id.is_empty())?;
            Some(RoomRef {
                id,
                name: opt_str(r, "name"),
            })
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> Value {
        json!({
            "request": {
                "requestId": "req-1",
                "agentId": "agent-001",
                "intentId": "agent-001:abc",
                "contextHash": "abc",
                "createdAtMs": 1_700_000_000_000u64,
                "promptVersion": "l0-v1",
                "ttlMs": 20_000
            },
            "context": {
                "agentId": "agent-001",
                "roomId": "r3",
                "state": "IDLE",
                "allowlistActions": ["IDLE", "TALK_TO_AGENT"]
            }
        })
    }

    fn check(v: &Value) -> Result<ValidatedDecide, String> {
        validate_decide(v.to_string().as_bytes(), 5)
    }

    #[test]
    fn accepts_minimal_body_and_builds_fallback() {
        let out = check(&body()).unwrap();
        assert_eq!(out.body.request.request_id, "req-1");
        assert_eq!(out.body.request.created_at_ms, 1_700_000_000_000);
        assert!(out.body.context.needs.is_none());
        assert_eq!(out.fallback.created_at_ms, 5);
        assert_eq!(out.fallback.decision.action, "IDLE");
        assert_eq!(out.fallback.decision.reason, "fallback");
        assert_eq!(out.fallback.intent_id, "agent-001:abc");
    }

    #[test]
    fn rejects_agent_mismatch() {
        let mut v = body();
        v["context"]["agentId"] = json!("agent-002");
        assert_eq!(check(&v).unwrap_err(), "request.agentId != context.agentId");
    }

    #[test]
    fn rejects_bad_ttl_and_allowlist() {
        for ttl in [json!(0), json!(120_001), json!("soon")] {
            let mut v = body();
            v["request"]["ttlMs"] = ttl;
            assert_eq!(check(&v).unwrap_err(), "invalid request.ttlMs");
        }
        let mut v = body();
        v["context"]["allowlistActions"] = json!([]);
        assert_eq!(check(&v).unwrap_err(), "empty context.allowlistActions");
        v["context"]["allowlistActions"] = json!(["IDLE", ""]);
        assert_eq!(check(&v).unwrap_err(), "invalid context.allowlistActions[1]");
    }

    #[test]
    fn rejects_non_json_and_missing_sections() {
        assert_eq!(validate_decide(b"{", 0).unwrap_err(), "invalid body");
        assert_eq!(validate_decide(b"[]", 0).unwrap_err(), "invalid body");
        assert_eq!(check(&json!({"request": {}})).unwrap_err(), "invalid context");
        let mut v = body();
        v["request"]["requestId"] = json!("");
        assert_eq!(check(&v).unwrap_err(), "invalid request.requestId");
    }

    #[test]
    fn normalises_optional_context() {
        let mut v = body();
        v["context"]["needs"] = json!({"energy": 1.7, "hunger": 0.456, "anxiety": "high"});
        v["context"]["rooms"] =
            json!([{"id": "r4", "name": "Kitchen"}, {"id": "r1"}, {"name": "x"}]);
        let nearby: Vec<Value> = (0..10)
            .map(|i| json!({"id": format!("n{i}"), "dist": 10.0 - i as f64 * 0.333}))
            .chain([json!({"id": "a-tie", "dist": 7.003}), json!({"dist": 0.1})])
            .collect();
        v["context"]["nearbyAgents"] = Value::Array(nearby);

        let ctx = check(&v).unwrap().body.context;
        let needs = ctx.needs.unwrap();
        assert_eq!(needs.energy, Some(1.0));
        assert_eq!(needs.hunger, Some(0.46));
        assert_eq!(needs.anxiety, None);

        let room_ids: Vec<&str> = ctx
            .rooms
            .as_ref()
            .unwrap()
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(room_ids, vec!["r1", "r4"]);

        let near = ctx.nearby_agents.unwrap();
        assert_eq!(near.len(), NEARBY_LIMIT);
        // 7.003 rounds to 7.0 and ties with n9; ids break the tie
        assert_eq!(near[0].id, "a-tie");
        assert_eq!(near[1].id, "n9");
        assert_eq!(near[1].dist, Some(7.0));
        assert_eq!(near[2].id, "n8");
        assert!(near.iter().all(|a| a.id != "n0"));
    }
}
