//! One simulation step, in a fixed order:
//!
//! 1. reclaim in-flight locks that timed out
//! 2. drain raw results and validate their shape
//! 3. filter and apply accepted decisions
//! 4. periodically sweep the dedup sets
//! 5. drain and reduce commands
//! 6. advance the world
//! 7. schedule new requests against the post-step world

use std::sync::Arc;

use serde_json::Value;
use steward_contracts::{DecisionResult, SCHEMA_VERSION};
use tracing::debug;

use crate::clock::Clock;
use crate::events::{DiscardReason, EngineEvent};
use crate::filter::filter_decision_results;
use crate::runtime::EngineRuntime;
use crate::scheduler::{Scheduler, SchedulerApi};
use crate::world::{DomainEvent, World, WorldOps};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub inflight_timeout_ms: u64,
    pub intent_sweep_every_ticks: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inflight_timeout_ms: 60_000,
            intent_sweep_every_ticks: 60,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(engine: &steward_config::Engine) -> Self {
        Self {
            inflight_timeout_ms: engine.inflight_timeout_ms,
            intent_sweep_every_ticks: engine.intent_sweep_every_ticks,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickOutput {
    pub world: World,
    pub domain_events: Vec<DomainEvent>,
    pub intents_needing_decision: Vec<String>,
    /// Request ids whose decisions were applied this tick.
    pub applied_request_ids: Vec<String>,
}

pub struct TickPipeline<O> {
    ops: O,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl<O: WorldOps> TickPipeline<O> {
    pub fn new(
        ops: O,
        scheduler: Scheduler,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ops,
            scheduler,
            clock,
            config,
        }
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Runs one step against `world` and returns the next world. `world` itself
    /// is never modified.
    pub fn tick(
        &mut self,
        rt: &mut EngineRuntime,
        world: &World,
        sim_dt: f64,
        tick_index: u64,
    ) -> TickOutput {
        rt.set_current_tick(tick_index);
        let now_ms = self.clock.now_ms();

        sweep_in_flight_timeouts(rt, now_ms, self.config.inflight_timeout_ms);

        let raw = rt.drain_decisions();
        let results = validate_results(rt, raw);

        let ops = &self.ops;
        let filtered = filter_decision_results(rt, results, now_ms, |agent_id| {
            ops.context_hash(world, agent_id)
        });
        rt.push_events(filtered.events);
        let applied = ops.apply_decisions(world.clone(), &filtered.accepted);
        let applied_request_ids = filtered
            .accepted
            .iter()
            .map(|r| r.request_id.clone())
            .collect();
        let mut domain_events = applied.events;

        let every = self.config.intent_sweep_every_ticks;
        if every > 0 && tick_index % every == 0 {
            let intents = rt.seen_intent_ids.sweep(now_ms);
            let requests = rt.seen_request_ids.sweep(now_ms);
            if intents + requests > 0 {
                debug!(tick = tick_index, intents, requests, "swept dedup sets");
            }
        }

        let commands = rt.drain_commands();
        let reduced = ops.reduce_commands(applied.world, &commands);
        for (command_id, reason) in reduced.rejected {
            rt.push_event(EngineEvent::CommandRejected {
                tick: tick_index,
                command_id,
                reason,
            });
        }
        domain_events.extend(reduced.events);

        let stepped = ops.step(reduced.world, sim_dt);
        domain_events.extend(stepped.events);

        let mut api = SchedulerApi::new(rt);
        self.scheduler
            .tick(&stepped.needing_decision, &stepped.world, ops, &mut api, now_ms);

        TickOutput {
            world: stepped.world,
            domain_events,
            intents_needing_decision: stepped.needing_decision,
            applied_request_ids,
        }
    }
}

/// Force-releases locks older than `timeout_ms`. A request still sitting in the
/// queue is withdrawn with its lock; one already executing is left to finish and
/// its late result is filtered like any other.
pub fn sweep_in_flight_timeouts(rt: &mut EngineRuntime, now_ms: u64, timeout_ms: u64) -> usize {
    let expired: Vec<(String, String)> = rt
        .in_flight
        .values()
        .filter(|f| now_ms.saturating_sub(f.started_at_ms) > timeout_ms)
        .map(|f| (f.agent_id.clone(), f.request_id.clone()))
        .collect();

    for (agent_id, request_id) in &expired {
        rt.in_flight.remove(agent_id);
        rt.queue.retain(|q| &q.request_id != request_id);
        rt.record_discard(agent_id, request_id, DiscardReason::InflightTimeout);
    }
    expired.len()
}

fn validate_results(rt: &mut EngineRuntime, raw: Vec<Value>) -> Vec<DecisionResult> {
    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        match parse_result(&value) {
            Ok(result) => out.push(result),
            Err(detail) => {
                let agent_id = value.get("agentId").and_then(Value::as_str).unwrap_or("");
                let request_id = value.get("requestId").and_then(Value::as_str).unwrap_or("");
                debug!(agent_id, request_id, detail = %detail, "malformed decision result");
                rt.release_in_flight_if(agent_id, request_id);
                rt.record_discard(agent_id, request_id, DiscardReason::SchemaMismatch);
            }
        }
    }
    out
}

fn parse_result(value: &Value) -> Result<DecisionResult, String> {
    let result: DecisionResult =
        serde_json::from_value(value.clone()).map_err(|err| err.to_string())?;
    if result.request_id.is_empty()
        || result.agent_id.is_empty()
        || result.intent_id.is_empty()
        || result.context_hash.is_empty()
    {
        return Err("empty identity field".to_string());
    }
    if result.schema_version != SCHEMA_VERSION {
        return Err(format!("unsupported schemaVersion {}", result.schema_version));
    }
    if result.decision.agent_id != result.agent_id {
        return Err("decision.agentId does not match agentId".to_string());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::InFlight;
    use serde_json::json;

    #[test]
    fn parse_result_rejects_missing_and_mismatched_fields() {
        assert!(parse_result(&json!({"requestId": "r1"})).is_err());
        let mut ok = json!({
            "requestId": "r1",
            "agentId": "a",
            "intentId": "a:h",
            "contextHash": "h",
            "createdAtMs": 1,
            "schemaVersion": 1,
            "decision": {"agentId": "a", "tickPlanned": 0, "action": "IDLE", "reason": "x"}
        });
        assert!(parse_result(&ok).is_ok());
        ok["decision"]["agentId"] = json!("b");
        assert!(parse_result(&ok).is_err());
    }

    #[test]
    fn malformed_results_release_lock_and_count() {
        let mut rt = EngineRuntime::default();
        rt.in_flight.insert(
            "a".to_string(),
            InFlight {
                request_id: "r1".to_string(),
                intent_id: "a:h".to_string(),
                agent_id: "a".to_string(),
                started_at_ms: 0,
            },
        );
        let out = validate_results(
            &mut rt,
            vec![json!({"requestId": "r1", "agentId": "a"}), json!(42)],
        );
        assert!(out.is_empty());
        assert_eq!(rt.in_flight_len(), 0);
        assert_eq!(rt.metrics().decision_discarded_total, 2);
    }

    #[test]
    fn timeout_sweep_only_touches_old_locks() {
        let mut rt = EngineRuntime::default();
        for (agent, started) in [("old", 0), ("fresh", 50_000)] {
            rt.in_flight.insert(
                agent.to_string(),
                InFlight {
                    request_id: format!("req-{agent}"),
                    intent_id: format!("{agent}:h"),
                    agent_id: agent.to_string(),
                    started_at_ms: started,
                },
            );
        }
        assert_eq!(sweep_in_flight_timeouts(&mut rt, 60_001, 60_000), 1);
        assert!(rt.in_flight_for("old").is_none());
        assert!(rt.in_flight_for("fresh").is_some());
        assert!(matches!(
            rt.events().last(),
            Some(EngineEvent::AiResultDiscarded {
                reason: DiscardReason::InflightTimeout,
                ..
            })
        ));
    }
}
