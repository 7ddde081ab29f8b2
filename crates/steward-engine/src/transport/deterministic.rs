use serde_json::Value;
use steward_contracts::DecisionRequest;

use crate::runtime::EngineRuntime;

/// Turns one request into zero or more raw results (duplicates included).
pub type ExecuteFn = Box<dyn FnMut(&DecisionRequest) -> Vec<Value> + Send>;

/// Simulated latency for a request, in milliseconds.
pub type LatencyFn = Box<dyn Fn(&DecisionRequest) -> u64 + Send>;

struct PendingCall {
    request: DecisionRequest,
    remaining_ms: i64,
    results: Vec<Value>,
}

/// Synchronous transport for headless runs: no threads, no wall clock.
///
/// Each [`step`](DeterministicWorker::step) first ages pending calls and
/// delivers finished ones in start order, then starts queued requests while
/// fewer than the concurrency limit are pending.
pub struct DeterministicWorker {
    execute: ExecuteFn,
    latency: LatencyFn,
    pending: Vec<PendingCall>,
}

impl DeterministicWorker {
    pub fn new(execute: ExecuteFn, latency: LatencyFn) -> Self {
        Self {
            execute,
            latency,
            pending: Vec::new(),
        }
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = &DecisionRequest> {
        self.pending.iter().map(|p| &p.request)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn step(&mut self, rt: &mut EngineRuntime, delta_ms: u64) {
        let delta = i64::try_from(delta_ms).unwrap_or(i64::MAX);
        for call in self.pending.iter_mut() {
            call.remaining_ms -= delta;
        }

        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|call| call.remaining_ms <= 0);
        self.pending = waiting;
        for call in done {
            for result in call.results {
                rt.submit_result(result);
            }
        }

        let max = rt.limits().max_concurrent_requests_total;
        while self.pending.len() < max {
            let Some(request) = rt.pop_request() else {
                break;
            };
            let results = (self.execute)(&request);
            let latency = (self.latency)(&request);
            self.pending.push(PendingCall {
                request,
                remaining_ms: i64::try_from(latency).unwrap_or(i64::MAX),
                results,
            });
        }
    }
}
