//! Admission control: the only place decision requests are created.

use std::collections::HashMap;
use std::sync::Arc;

use steward_contracts::{intent_id, DecisionRequest, MAX_TTL_MS};

use crate::events::EngineEvent;
use crate::queue::enqueue_with_fair_backpressure;
use crate::runtime::{EngineRuntime, InFlight};
use crate::world::{World, WorldOps};

/// Everything a request id may be derived from.
#[derive(Debug, Clone, Copy)]
pub struct RequestIdInput<'a> {
    pub seq: u64,
    pub agent_id: &'a str,
    pub intent_id: &'a str,
    pub context_hash: &'a str,
    pub created_at_ms: u64,
    pub prompt_version: &'a str,
}

pub type RequestIdFactory = Arc<dyn Fn(&RequestIdInput<'_>) -> String + Send + Sync>;

pub fn random_request_id(_: &RequestIdInput<'_>) -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone)]
pub struct SchedulerConfig {
    pub prompt_version: String,
    pub ttl_ms: u64,
    pub cooldown_ms: u64,
    pub allowlist_actions: Vec<String>,
    pub request_id_factory: RequestIdFactory,
}

impl SchedulerConfig {
    pub fn from_config(engine: &steward_config::Engine) -> Self {
        Self {
            prompt_version: engine.prompt_version.clone(),
            ttl_ms: engine.ttl_ms.clamp(1, MAX_TTL_MS),
            cooldown_ms: engine.cooldown_ms,
            allowlist_actions: engine.allowlist_actions.clone(),
            request_id_factory: Arc::new(random_request_id),
        }
    }

    pub fn with_request_id_factory(mut self, factory: RequestIdFactory) -> Self {
        self.request_id_factory = factory;
        self
    }
}

impl std::fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("prompt_version", &self.prompt_version)
            .field("ttl_ms", &self.ttl_ms)
            .field("cooldown_ms", &self.cooldown_ms)
            .field("allowlist_actions", &self.allowlist_actions)
            .finish_non_exhaustive()
    }
}

/// Narrow write surface the scheduler gets over runtime state.
pub struct SchedulerApi<'a> {
    rt: &'a mut EngineRuntime,
}

impl<'a> SchedulerApi<'a> {
    pub fn new(rt: &'a mut EngineRuntime) -> Self {
        Self { rt }
    }

    /// Queues `request`. An evicted request loses its agent's lock if it still holds it.
    pub fn enqueue(&mut self, request: DecisionRequest) {
        if let Some(dropped) = enqueue_with_fair_backpressure(self.rt, request) {
            self.rt
                .release_in_flight_if(&dropped.agent_id, &dropped.request_id);
        }
    }

    pub fn set_in_flight(&mut self, entry: InFlight) {
        self.rt.in_flight.insert(entry.agent_id.clone(), entry);
    }

    pub fn clear_in_flight(&mut self, agent_id: &str) {
        self.rt.in_flight.remove(agent_id);
    }

    pub fn has_in_flight(&self, agent_id: &str) -> bool {
        self.rt.in_flight.contains_key(agent_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.rt.in_flight.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.rt.limits().max_concurrent_requests_total
    }

    pub fn push_event(&mut self, event: EngineEvent) {
        self.rt.push_event(event);
    }

    pub fn tick(&self) -> u64 {
        self.rt.current_tick()
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    last_enqueued_at_ms: HashMap<String, u64>,
    seq: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            last_enqueued_at_ms: HashMap::new(),
            seq: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Creates requests for eligible agents, in the given priority order.
    ///
    /// Stops as soon as the global concurrency cap is reached; agents already in
    /// flight, still cooling down, or unknown to the world are skipped.
    pub fn tick<O>(
        &mut self,
        needing_decision: &[String],
        world: &World,
        ops: &O,
        api: &mut SchedulerApi<'_>,
        now_ms: u64,
    ) where
        O: WorldOps + ?Sized,
    {
        for agent_id in needing_decision {
            if api.in_flight_count() >= api.max_concurrent() {
                break;
            }
            if api.has_in_flight(agent_id) {
                continue;
            }
            if let Some(last) = self.last_enqueued_at_ms.get(agent_id) {
                if now_ms.saturating_sub(*last) < self.config.cooldown_ms {
                    continue;
                }
            }

            let Some(context_hash) = ops.context_hash(world, agent_id) else {
                continue;
            };
            let Some(context) =
                ops.decision_context(world, agent_id, &self.config.allowlist_actions)
            else {
                continue;
            };

            let intent = intent_id(agent_id, &context_hash);
            let seq = self.seq;
            self.seq += 1;
            let request_id = (self.config.request_id_factory)(&RequestIdInput {
                seq,
                agent_id,
                intent_id: &intent,
                context_hash: &context_hash,
                created_at_ms: now_ms,
                prompt_version: &self.config.prompt_version,
            });

            let request = DecisionRequest {
                request_id: request_id.clone(),
                agent_id: agent_id.clone(),
                intent_id: intent.clone(),
                context_hash,
                created_at_ms: now_ms,
                prompt_version: self.config.prompt_version.clone(),
                ttl_ms: self.config.ttl_ms,
                context,
            };

            api.enqueue(request);
            api.set_in_flight(InFlight {
                request_id: request_id.clone(),
                intent_id: intent,
                agent_id: agent_id.clone(),
                started_at_ms: now_ms,
            });
            self.last_enqueued_at_ms.insert(agent_id.clone(), now_ms);

            let tick = api.tick();
            api.push_event(EngineEvent::AiRequestSent {
                tick,
                agent_id: agent_id.clone(),
                request_id,
            });
        }
    }
}
