pub mod clock;
pub mod events;
pub mod filter;
pub mod fixed_step;
pub mod golden;
pub mod headless;
pub mod pipeline;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod transport;
pub mod ttl;
pub mod world;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{DiscardReason, EngineEvent, EngineMetrics};
pub use filter::{filter_decision_results, FilterOutcome};
pub use fixed_step::{FixedStepLoop, MAX_TICKS_PER_FRAME, SIM_DT};
pub use golden::{
    golden_key, load_golden, record_golden, verify_golden, Checkpoint, GoldenError, GoldenFile,
    GoldenRun,
};
pub use headless::{run_headless, HeadlessConfig, HeadlessError, HeadlessReport};
pub use pipeline::{sweep_in_flight_timeouts, PipelineConfig, TickOutput, TickPipeline};
pub use queue::enqueue_with_fair_backpressure;
pub use runtime::{EngineRuntime, InFlight, RuntimeLimits};
pub use scheduler::{RequestIdFactory, RequestIdInput, Scheduler, SchedulerApi, SchedulerConfig};
pub use transport::{
    check_echo, start_decision_worker, DecisionExecutor, DeterministicWorker, LocalBrainExecutor,
    ProxyExecutor, SharedRuntime, TransportError, WorkerHandle,
};
pub use ttl::TtlSet;
pub use world::{World, WorldOps};
