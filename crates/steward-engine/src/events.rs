//! Engine-level audit events and counters.
//!
//! These are not world events: they record what the coordination layer did
//! (drops, discards, transport failures) and are never read back as state.

use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    StaleContext,
    DuplicateIntentTtl,
    SchemaMismatch,
    InflightTimeout,
    WorkerError,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::StaleContext => "stale_context",
            DiscardReason::DuplicateIntentTtl => "duplicate_intent_ttl",
            DiscardReason::SchemaMismatch => "schema_mismatch",
            DiscardReason::InflightTimeout => "inflight_timeout",
            DiscardReason::WorkerError => "worker_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum EngineEvent {
    SimDroppedTicks {
        tick: u64,
        dropped: u64,
    },
    AiBackpressure {
        tick: u64,
        enqueued_agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dropped_agent_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        dropped_intent_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        dropped_request_id: Option<String>,
    },
    CommandRejected {
        tick: u64,
        command_id: String,
        reason: String,
    },
    AiRequestSent {
        tick: u64,
        agent_id: String,
        request_id: String,
    },
    AiResultReceived {
        tick: u64,
        agent_id: String,
        request_id: String,
        latency_ms: u64,
    },
    AiRequestFailed {
        tick: u64,
        agent_id: String,
        request_id: String,
        reason: String,
    },
    AiResultDiscarded {
        tick: u64,
        agent_id: String,
        request_id: String,
        reason: DiscardReason,
    },
}

impl EngineEvent {
    pub fn tick(&self) -> u64 {
        match self {
            EngineEvent::SimDroppedTicks { tick, .. }
            | EngineEvent::AiBackpressure { tick, .. }
            | EngineEvent::CommandRejected { tick, .. }
            | EngineEvent::AiRequestSent { tick, .. }
            | EngineEvent::AiResultReceived { tick, .. }
            | EngineEvent::AiRequestFailed { tick, .. }
            | EngineEvent::AiResultDiscarded { tick, .. } => *tick,
        }
    }

    pub(crate) fn log(&self) {
        match self {
            EngineEvent::SimDroppedTicks { tick, dropped } => {
                warn!(tick, dropped, "simulation dropped ticks")
            }
            EngineEvent::AiBackpressure {
                tick,
                enqueued_agent_id,
                dropped_agent_id,
                dropped_request_id,
                ..
            } => warn!(
                tick,
                enqueued_agent_id = %enqueued_agent_id,
                dropped_agent_id = dropped_agent_id.as_deref().unwrap_or(""),
                dropped_request_id = dropped_request_id.as_deref().unwrap_or(""),
                "decision queue full; evicted request"
            ),
            EngineEvent::CommandRejected {
                tick,
                command_id,
                reason,
            } => debug!(tick, command_id = %command_id, reason = %reason, "command rejected"),
            EngineEvent::AiRequestSent {
                tick,
                agent_id,
                request_id,
            } => debug!(
                tick,
                agent_id = %agent_id,
                request_id = %request_id,
                "decision request queued"
            ),
            EngineEvent::AiResultReceived {
                tick,
                agent_id,
                request_id,
                latency_ms,
            } => debug!(
                tick,
                agent_id = %agent_id,
                request_id = %request_id,
                latency_ms,
                "decision accepted"
            ),
            EngineEvent::AiRequestFailed {
                tick,
                agent_id,
                request_id,
                reason,
            } => warn!(
                tick,
                agent_id = %agent_id,
                request_id = %request_id,
                reason = %reason,
                "decision request failed"
            ),
            EngineEvent::AiResultDiscarded {
                tick,
                agent_id,
                request_id,
                reason,
            } => debug!(
                tick,
                agent_id = %agent_id,
                request_id = %request_id,
                reason = reason.as_str(),
                "decision discarded"
            ),
        }
    }
}

/// Monotonic counters; never decremented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetrics {
    pub dropped_ticks_total: u64,
    pub backpressure_drops_total: u64,
    pub decision_discarded_total: u64,
    pub requests_failed_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_type_tag() {
        let e = EngineEvent::AiResultDiscarded {
            tick: 4,
            agent_id: "a1".to_string(),
            request_id: "r1".to_string(),
            reason: DiscardReason::DuplicateIntentTtl,
        };
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            json!({
                "type": "AI_RESULT_DISCARDED",
                "tick": 4,
                "agentId": "a1",
                "requestId": "r1",
                "reason": "duplicate_intent_ttl"
            })
        );
        assert_eq!(e.tick(), 4);
    }

    #[test]
    fn backpressure_omits_missing_victim_fields() {
        let e = EngineEvent::AiBackpressure {
            tick: 1,
            enqueued_agent_id: "a1".to_string(),
            dropped_agent_id: None,
            dropped_intent_id: None,
            dropped_request_id: None,
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "AI_BACKPRESSURE");
        assert!(v.get("droppedAgentId").is_none());
    }
}
