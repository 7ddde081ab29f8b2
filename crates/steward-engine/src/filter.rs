use steward_contracts::DecisionResult;

use crate::events::{DiscardReason, EngineEvent};
use crate::runtime::EngineRuntime;

/// Accepted results plus the engine events raised while filtering.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub accepted: Vec<DecisionResult>,
    pub events: Vec<EngineEvent>,
}

/// Gates returned decisions before they may touch the world.
///
/// Checks run in order: duplicate `requestId` (dropped silently), stale context
/// hash, then intent already satisfied within the TTL window. A discard releases
/// the agent's lock only if the lock still belongs to the discarded request.
/// Counters are updated here; the returned events are left for the caller to push.
pub fn filter_decision_results<F>(
    rt: &mut EngineRuntime,
    results: Vec<DecisionResult>,
    now_ms: u64,
    current_context_hash: F,
) -> FilterOutcome
where
    F: Fn(&str) -> Option<String>,
{
    let tick = rt.current_tick();
    let mut out = FilterOutcome::default();

    for result in results {
        if rt.seen_request_ids.contains(&result.request_id, now_ms) {
            continue;
        }
        rt.seen_request_ids.insert(result.request_id.clone(), now_ms);

        let current = current_context_hash(&result.agent_id);
        let reason = if current.as_deref() != Some(result.context_hash.as_str()) {
            Some(DiscardReason::StaleContext)
        } else if rt.seen_intent_ids.contains(&result.intent_id, now_ms) {
            Some(DiscardReason::DuplicateIntentTtl)
        } else {
            None
        };

        if let Some(reason) = reason {
            rt.release_in_flight_if(&result.agent_id, &result.request_id);
            rt.metrics.decision_discarded_total += 1;
            out.events.push(EngineEvent::AiResultDiscarded {
                tick,
                agent_id: result.agent_id.clone(),
                request_id: result.request_id.clone(),
                reason,
            });
            continue;
        }

        rt.seen_intent_ids.insert(result.intent_id.clone(), now_ms);
        let started_at_ms = match rt.in_flight.get(&result.agent_id) {
            Some(entry) if entry.request_id == result.request_id => {
                let started = entry.started_at_ms;
                rt.in_flight.remove(&result.agent_id);
                started
            }
            _ => result.created_at_ms,
        };
        out.events.push(EngineEvent::AiResultReceived {
            tick,
            agent_id: result.agent_id.clone(),
            request_id: result.request_id.clone(),
            latency_ms: now_ms.saturating_sub(started_at_ms),
        });
        out.accepted.push(result);
    }
    out
}
