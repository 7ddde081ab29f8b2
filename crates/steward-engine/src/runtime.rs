use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;
use steward_contracts::{Command, DecisionRequest, MAX_TTL_MS};

use crate::events::{DiscardReason, EngineEvent, EngineMetrics};
use crate::ttl::TtlSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLimits {
    pub max_concurrent_requests_total: usize,
    pub max_queue_size: usize,
    pub events_ring_max: usize,
    /// Retention of seen request and intent ids. Must cover the full request TTL.
    pub seen_ttl_ms: u64,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_concurrent_requests_total: 3,
            max_queue_size: 100,
            events_ring_max: 1_000,
            seen_ttl_ms: MAX_TTL_MS,
        }
    }
}

impl RuntimeLimits {
    pub fn from_config(engine: &steward_config::Engine) -> Self {
        Self {
            max_concurrent_requests_total: engine.max_concurrent_requests_total.max(1),
            max_queue_size: engine.max_queue_size.max(1),
            events_ring_max: engine.events_ring_max.max(1),
            seen_ttl_ms: MAX_TTL_MS,
        }
    }
}

/// Lock held by an agent while one of its requests is queued or executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub request_id: String,
    pub intent_id: String,
    pub agent_id: String,
    pub started_at_ms: u64,
}

/// Cross-tick coordination state shared by the tick pipeline and a transport.
///
/// Holds buffers, the request queue, in-flight locks, dedup sets, counters and
/// the event ring. Nothing here knows about the world.
#[derive(Debug)]
pub struct EngineRuntime {
    pub(crate) decision_buffer: Vec<Value>,
    pub(crate) command_buffer: Vec<Command>,
    pub(crate) queue: VecDeque<DecisionRequest>,
    pub(crate) in_flight: BTreeMap<String, InFlight>,
    pub(crate) seen_request_ids: TtlSet,
    pub(crate) seen_intent_ids: TtlSet,
    pub(crate) metrics: EngineMetrics,
    events: VecDeque<EngineEvent>,
    limits: RuntimeLimits,
    current_tick: u64,
}

impl Default for EngineRuntime {
    fn default() -> Self {
        Self::new(RuntimeLimits::default())
    }
}

impl EngineRuntime {
    pub fn new(limits: RuntimeLimits) -> Self {
        Self {
            decision_buffer: Vec::new(),
            command_buffer: Vec::new(),
            queue: VecDeque::new(),
            in_flight: BTreeMap::new(),
            seen_request_ids: TtlSet::new(limits.seen_ttl_ms),
            seen_intent_ids: TtlSet::new(limits.seen_ttl_ms),
            metrics: EngineMetrics::default(),
            events: VecDeque::new(),
            limits,
            current_tick: 0,
        }
    }

    pub fn limits(&self) -> &RuntimeLimits {
        &self.limits
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub(crate) fn set_current_tick(&mut self, tick: u64) {
        self.current_tick = tick;
    }

    pub fn push_event(&mut self, event: EngineEvent) {
        event.log();
        self.events.push_back(event);
        while self.events.len() > self.limits.events_ring_max {
            self.events.pop_front();
        }
    }

    pub fn push_events(&mut self, events: impl IntoIterator<Item = EngineEvent>) {
        for event in events {
            self.push_event(event);
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &EngineEvent> {
        self.events.iter()
    }

    /// Raw result payload from a transport. Validated when the pipeline drains it.
    pub fn submit_result(&mut self, result: Value) {
        self.decision_buffer.push(result);
    }

    pub fn submit_command(&mut self, command: Command) {
        self.command_buffer.push(command);
    }

    pub fn drain_decisions(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.decision_buffer)
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.command_buffer)
    }

    /// Takes the oldest queued request for execution. Its in-flight lock stays held.
    pub fn pop_request(&mut self) -> Option<DecisionRequest> {
        self.queue.pop_front()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> impl Iterator<Item = &DecisionRequest> {
        self.queue.iter()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &InFlight> {
        self.in_flight.values()
    }

    pub fn in_flight_for(&self, agent_id: &str) -> Option<&InFlight> {
        self.in_flight.get(agent_id)
    }

    /// Drops the agent's lock only when it still belongs to `request_id`.
    pub fn release_in_flight_if(&mut self, agent_id: &str, request_id: &str) -> bool {
        match self.in_flight.get(agent_id) {
            Some(entry) if entry.request_id == request_id => {
                self.in_flight.remove(agent_id);
                true
            }
            _ => false,
        }
    }

    /// Transport could not produce a result for `request`.
    pub fn record_request_failure(&mut self, request: &DecisionRequest, reason: impl Into<String>) {
        self.release_in_flight_if(&request.agent_id, &request.request_id);
        self.metrics.requests_failed_total += 1;
        let tick = self.current_tick;
        self.push_event(EngineEvent::AiRequestFailed {
            tick,
            agent_id: request.agent_id.clone(),
            request_id: request.request_id.clone(),
            reason: reason.into(),
        });
    }

    pub(crate) fn record_discard(
        &mut self,
        agent_id: &str,
        request_id: &str,
        reason: DiscardReason,
    ) {
        self.metrics.decision_discarded_total += 1;
        let tick = self.current_tick;
        self.push_event(EngineEvent::AiResultDiscarded {
            tick,
            agent_id: agent_id.to_string(),
            request_id: request_id.to_string(),
            reason,
        });
    }

    /// Transport returned something that cannot be attributed to `request`.
    pub fn record_worker_error(&mut self, request: &DecisionRequest) {
        self.release_in_flight_if(&request.agent_id, &request.request_id);
        self.record_discard(&request.agent_id, &request.request_id, DiscardReason::WorkerError);
    }
}
