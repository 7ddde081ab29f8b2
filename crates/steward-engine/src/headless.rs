//! Deterministic headless driver.
//!
//! Runs the full tick pipeline against the hostel world with a manual clock, a
//! seeded request-id factory and the synchronous [`DeterministicWorker`], and
//! checks the engine invariants after every tick.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use steward_contracts::DecisionRequest;
use steward_kernel::{fnv1a32, stable_request_id, DEFAULT_L0_WORLD_MAP};
use thiserror::Error;
use tracing::info;

use crate::clock::ManualClock;
use crate::events::EngineMetrics;
use crate::fixed_step::SIM_DT;
use crate::golden::{golden_key, Checkpoint, GoldenError, GoldenRun};
use crate::pipeline::{PipelineConfig, TickPipeline};
use crate::runtime::{EngineRuntime, RuntimeLimits};
use crate::scheduler::{RequestIdInput, Scheduler, SchedulerConfig};
use crate::transport::{local_brain_result, DeterministicWorker};
use crate::world::hostel::{generate_world, HostelOps};
use crate::world::world_signature;

pub const HEADLESS_EPOCH_MS: u64 = 1_700_000_000_000;

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub seed: u64,
    pub agents: usize,
    pub ticks: u64,
    pub checkpoint_every: u64,
    pub engine: steward_config::Engine,
    pub base_latency_ms: u64,
    /// Every request whose id hashes to a multiple of this is delivered twice.
    /// Zero disables duplicates.
    pub duplicate_every: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            agents: 8,
            ticks: 600,
            checkpoint_every: 100,
            engine: steward_config::Engine::default(),
            base_latency_ms: 120,
            duplicate_every: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadlessReport {
    pub key: String,
    pub checkpoints: Vec<Checkpoint>,
    pub final_signature: String,
    pub metrics: EngineMetrics,
    pub decisions_applied: u64,
}

impl HeadlessReport {
    pub fn golden_run(&self) -> GoldenRun {
        GoldenRun {
            checkpoints: self.checkpoints.clone(),
            final_signature: self.final_signature.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HeadlessError {
    #[error("invariant violated at tick {tick}: {detail}")]
    InvariantViolation { tick: u64, detail: String },
    #[error("failed to compute world signature: {0}")]
    Signature(String),
    #[error(transparent)]
    Golden(#[from] GoldenError),
}

fn deterministic_worker(
    seed: u64,
    base_latency_ms: u64,
    duplicate_every: u32,
) -> DeterministicWorker {
    let execute = move |request: &DecisionRequest| {
        let result =
            local_brain_result(request, seed, &DEFAULT_L0_WORLD_MAP, request.created_at_ms);
        let value = serde_json::to_value(result).unwrap_or(Value::Null);
        if duplicate_every > 0 && fnv1a32(&request.request_id) % duplicate_every == 0 {
            vec![value.clone(), value]
        } else {
            vec![value]
        }
    };
    let latency = move |request: &DecisionRequest| {
        base_latency_ms + u64::from(fnv1a32(&format!("latency:{}", request.request_id)) % 400)
    };
    DeterministicWorker::new(Box::new(execute), Box::new(latency))
}

/// No overflow, no leaked locks, bounded event ring.
pub fn check_invariants(
    rt: &EngineRuntime,
    worker: &DeterministicWorker,
    tick: u64,
) -> Result<(), HeadlessError> {
    let violation = |detail: String| HeadlessError::InvariantViolation { tick, detail };
    let limits = rt.limits();

    if rt.queue_len() > limits.max_queue_size {
        return Err(violation(format!(
            "queue length {} exceeds {}",
            rt.queue_len(),
            limits.max_queue_size
        )));
    }
    if rt.in_flight_len() > limits.max_concurrent_requests_total {
        return Err(violation(format!(
            "{} in flight exceeds {}",
            rt.in_flight_len(),
            limits.max_concurrent_requests_total
        )));
    }

    let live: HashSet<&str> = rt
        .queued()
        .chain(worker.pending_requests())
        .map(|r| r.request_id.as_str())
        .collect();
    if let Some(leak) = rt
        .in_flight()
        .find(|f| !live.contains(f.request_id.as_str()))
    {
        return Err(violation(format!(
            "agent {} holds lock for {} which is neither queued nor pending",
            leak.agent_id, leak.request_id
        )));
    }

    let events = rt.events().count();
    if events > limits.events_ring_max {
        return Err(violation(format!(
            "event ring holds {events} > {}",
            limits.events_ring_max
        )));
    }
    Ok(())
}

pub fn run_headless(cfg: &HeadlessConfig) -> Result<HeadlessReport, HeadlessError> {
    let seed = cfg.seed;
    let clock = ManualClock::new(HEADLESS_EPOCH_MS);
    let scheduler_cfg = SchedulerConfig::from_config(&cfg.engine).with_request_id_factory(Arc::new(
        move |input: &RequestIdInput<'_>| stable_request_id(seed, input.seq, input.intent_id),
    ));
    let mut pipeline = TickPipeline::new(
        HostelOps::default(),
        Scheduler::new(scheduler_cfg),
        Arc::new(clock.clone()),
        PipelineConfig::from_config(&cfg.engine),
    );
    let mut rt = EngineRuntime::new(RuntimeLimits::from_config(&cfg.engine));
    let mut worker = deterministic_worker(seed, cfg.base_latency_ms, cfg.duplicate_every);
    let mut world = generate_world(seed, cfg.agents);

    let mut applied: HashSet<String> = HashSet::new();
    let mut checkpoints = Vec::new();
    let mut elapsed_ms = 0;

    for tick in 0..cfg.ticks {
        let now_elapsed = (tick + 1) * 1_000 / 30;
        worker.step(&mut rt, now_elapsed - elapsed_ms);
        elapsed_ms = now_elapsed;
        clock.set(HEADLESS_EPOCH_MS + elapsed_ms);

        let out = pipeline.tick(&mut rt, &world, SIM_DT, tick);
        world = out.world;

        for request_id in out.applied_request_ids {
            if !applied.insert(request_id.clone()) {
                return Err(HeadlessError::InvariantViolation {
                    tick,
                    detail: format!("request {request_id} applied twice"),
                });
            }
        }
        check_invariants(&rt, &worker, tick)?;

        if cfg.checkpoint_every > 0 && (tick + 1) % cfg.checkpoint_every == 0 {
            checkpoints.push(Checkpoint {
                tick: tick + 1,
                signature: world_signature(&world).map_err(HeadlessError::Signature)?,
            });
        }
    }

    let final_signature = world_signature(&world).map_err(HeadlessError::Signature)?;
    let report = HeadlessReport {
        key: golden_key(cfg.seed, cfg.agents, cfg.ticks),
        checkpoints,
        final_signature,
        metrics: rt.metrics().clone(),
        decisions_applied: applied.len() as u64,
    };
    info!(
        key = %report.key,
        decisions = report.decisions_applied,
        discarded = report.metrics.decision_discarded_total,
        signature = %report.final_signature,
        "headless run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_run_is_reproducible() {
        let cfg = HeadlessConfig {
            seed: 3,
            agents: 4,
            ticks: 120,
            checkpoint_every: 30,
            ..HeadlessConfig::default()
        };
        let a = run_headless(&cfg).unwrap();
        let b = run_headless(&cfg).unwrap();
        assert_eq!(a.checkpoints.len(), 4);
        assert_eq!(a.golden_run(), b.golden_run());
        assert_eq!(a.key, "seed=3,agents=4,ticks=120");
    }
}
