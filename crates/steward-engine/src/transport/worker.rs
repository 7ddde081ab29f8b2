use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use steward_contracts::DecisionRequest;
use tokio::sync::oneshot;
use tokio::task::{Id, JoinHandle, JoinSet};
use tracing::{error, info, warn};

use super::{check_echo, DecisionExecutor, TransportError};
use crate::runtime::EngineRuntime;

pub type SharedRuntime = Arc<Mutex<EngineRuntime>>;

type Pending = Arc<Mutex<BTreeMap<String, DecisionRequest>>>;

/// Handle to a running worker task.
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    pending: Pending,
}

impl WorkerHandle {
    /// Request ids currently executing (taken off the queue, no result yet).
    pub fn pending_request_ids(&self) -> Vec<String> {
        lock(&self.pending).keys().cloned().collect()
    }

    /// Stops pulling new work and waits for the task to exit. Executions still
    /// running are abandoned; their locks are reclaimed by the timeout sweep.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.task.await {
            error!(error = %err, "decision worker task failed");
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Spawns a worker that pulls queued requests up to the runtime's concurrency
/// limit, executes them, and pushes results back into the decision buffer.
pub fn start_decision_worker<E: DecisionExecutor>(
    runtime: SharedRuntime,
    executor: Arc<E>,
    poll_interval: Duration,
) -> WorkerHandle {
    let (tx, mut rx) = oneshot::channel::<()>();
    let pending: Pending = Arc::new(Mutex::new(BTreeMap::new()));
    let pending_task = pending.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut running: JoinSet<Result<Value, TransportError>> = JoinSet::new();
        let mut by_task: HashMap<Id, DecisionRequest> = HashMap::new();
        info!(poll_ms = poll_interval.as_millis() as u64, "decision worker started");

        loop {
            tokio::select! {
                _ = &mut rx => break,
                Some(joined) = running.join_next_with_id(), if !running.is_empty() => {
                    let (id, outcome) = match joined {
                        Ok((id, outcome)) => (id, Ok(outcome)),
                        Err(err) => (err.id(), Err(err)),
                    };
                    if let Some(request) = by_task.remove(&id) {
                        lock(&pending_task).remove(&request.request_id);
                        match outcome {
                            Ok(outcome) => deliver(&runtime, &request, outcome),
                            Err(err) => {
                                error!(
                                    request_id = %request.request_id,
                                    error = %err,
                                    "decision execution panicked"
                                );
                                lock(&runtime)
                                    .record_request_failure(&request, "executor panicked");
                            }
                        }
                    }
                }
                _ = ticker.tick() => {}
            }

            {
                let mut rt = lock(&runtime);
                let max = rt.limits().max_concurrent_requests_total;
                while running.len() < max {
                    let Some(request) = rt.pop_request() else {
                        break;
                    };
                    lock(&pending_task).insert(request.request_id.clone(), request.clone());
                    let exec = executor.clone();
                    let owned = request.clone();
                    let handle = running.spawn(async move { exec.execute(owned).await });
                    by_task.insert(handle.id(), request);
                }
            }
        }

        running.abort_all();
        info!("decision worker stopped");
    });

    WorkerHandle {
        shutdown: Some(tx),
        task,
        pending,
    }
}

fn deliver(
    runtime: &SharedRuntime,
    request: &DecisionRequest,
    outcome: Result<Value, TransportError>,
) {
    let mut rt = lock(runtime);
    match outcome.and_then(|value| check_echo(request, &value).map(|_| value)) {
        Ok(value) => rt.submit_result(value),
        Err(err @ TransportError::EchoMismatch(_)) | Err(err @ TransportError::Decode(_)) => {
            warn!(request_id = %request.request_id, error = %err, "unusable decision result");
            rt.record_worker_error(request);
        }
        Err(err) => rt.record_request_failure(request, err.to_string()),
    }
}
