use steward_contracts::DecisionRequest;

use crate::events::EngineEvent;
use crate::runtime::EngineRuntime;

/// Appends `request`, evicting when the queue is at capacity.
///
/// The victim is the oldest queued request of the same agent, otherwise the
/// globally oldest one. The incoming request is always admitted; the evicted
/// request (if any) is returned so the caller can release its lock.
pub fn enqueue_with_fair_backpressure(
    rt: &mut EngineRuntime,
    request: DecisionRequest,
) -> Option<DecisionRequest> {
    let capacity = rt.limits().max_queue_size.max(1);
    let mut dropped = None;

    if rt.queue.len() >= capacity {
        let same_agent = rt
            .queue
            .iter()
            .position(|queued| queued.agent_id == request.agent_id);
        dropped = match same_agent {
            Some(idx) => rt.queue.remove(idx),
            None => rt.queue.pop_front(),
        };

        rt.metrics.backpressure_drops_total += 1;
        let tick = rt.current_tick();
        rt.push_event(EngineEvent::AiBackpressure {
            tick,
            enqueued_agent_id: request.agent_id.clone(),
            dropped_agent_id: dropped.as_ref().map(|d| d.agent_id.clone()),
            dropped_intent_id: dropped.as_ref().map(|d| d.intent_id.clone()),
            dropped_request_id: dropped.as_ref().map(|d| d.request_id.clone()),
        });
    }

    rt.queue.push_back(request);
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeLimits;
    use steward_contracts::DecideContext;

    fn req(agent: &str, id: &str) -> DecisionRequest {
        DecisionRequest {
            request_id: id.to_string(),
            agent_id: agent.to_string(),
            intent_id: format!("{agent}:h"),
            context_hash: "h".to_string(),
            created_at_ms: 0,
            prompt_version: "l0-v1".to_string(),
            ttl_ms: 20_000,
            context: DecideContext {
                agent_id: agent.to_string(),
                room_id: "r1".to_string(),
                state: "IDLE".to_string(),
                needs: None,
                nearby_agents: None,
                rooms: None,
                allowlist_actions: vec!["IDLE".to_string()],
            },
        }
    }

    fn runtime(capacity: usize) -> EngineRuntime {
        EngineRuntime::new(RuntimeLimits {
            max_queue_size: capacity,
            ..RuntimeLimits::default()
        })
    }

    fn queued_ids(rt: &EngineRuntime) -> Vec<String> {
        rt.queued().map(|r| r.request_id.clone()).collect()
    }

    #[test]
    fn evicts_oldest_same_agent_first() {
        let mut rt = runtime(2);
        enqueue_with_fair_backpressure(&mut rt, req("b", "b1"));
        enqueue_with_fair_backpressure(&mut rt, req("a", "a1"));
        let dropped = enqueue_with_fair_backpressure(&mut rt, req("a", "a2"));
        assert_eq!(dropped.map(|d| d.request_id), Some("a1".to_string()));
        assert_eq!(queued_ids(&rt), vec!["b1", "a2"]);
    }

    #[test]
    fn falls_back_to_global_oldest() {
        let mut rt = runtime(2);
        enqueue_with_fair_backpressure(&mut rt, req("a", "a1"));
        enqueue_with_fair_backpressure(&mut rt, req("b", "b1"));
        let dropped = enqueue_with_fair_backpressure(&mut rt, req("c", "c1"));
        assert_eq!(dropped.map(|d| d.request_id), Some("a1".to_string()));
        assert_eq!(queued_ids(&rt), vec!["b1", "c1"]);

        let event = rt.events().last().cloned();
        assert_eq!(
            event,
            Some(EngineEvent::AiBackpressure {
                tick: 0,
                enqueued_agent_id: "c".to_string(),
                dropped_agent_id: Some("a".to_string()),
                dropped_intent_id: Some("a:h".to_string()),
                dropped_request_id: Some("a1".to_string()),
            })
        );
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut rt = runtime(3);
        for i in 0..50 {
            enqueue_with_fair_backpressure(&mut rt, req(&format!("a{}", i % 4), &format!("r{i}")));
            assert!(rt.queue_len() <= 3);
        }
        assert_eq!(rt.metrics().backpressure_drops_total, 47);
    }
}
