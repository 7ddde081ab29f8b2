use std::env;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use steward_config::Config;
use steward_engine::world::hostel::{generate_world, HostelOps};
use steward_engine::{
    record_golden, run_headless, start_decision_worker, verify_golden, EngineRuntime,
    FixedStepLoop, HeadlessConfig, LocalBrainExecutor, PipelineConfig, ProxyExecutor,
    RuntimeLimits, Scheduler, SchedulerConfig, SharedRuntime, SystemClock, TickPipeline,
    WorkerHandle,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const USAGE: &str = "Usage:
  steward serve --config <path>
  steward simulate --config <path> [--seconds N]
  steward headless --seed N --agents N --ticks N [--checkpoint-every N] [--golden <path>] [--write-golden]";

#[tokio::main]
async fn main() {
    init_tracing();

    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    let rest: Vec<String> = args.collect();

    let outcome = match cmd.as_str() {
        "serve" => {
            let cfg = load_config(&rest);
            steward_server::serve(cfg).await
        }
        "simulate" => {
            let cfg = load_config(&rest);
            let seconds = flag_value(&rest, "--seconds").map_or(10, |v| parse_num("--seconds", &v));
            simulate(cfg, seconds).await
        }
        "headless" => headless(&rest),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = outcome {
        eprintln!("{cmd} exited with error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(env_filter).try_init();
}

fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn parse_num<T: FromStr>(name: &str, value: &str) -> T {
    match value.parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("{name} expects a number, got {value}");
            std::process::exit(2);
        }
    }
}

fn load_config(args: &[String]) -> Config {
    let config_path =
        flag_value(args, "--config").unwrap_or_else(|| "./config/example-config.yaml".to_string());
    match steward_config::load_and_validate(&config_path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    }
}

fn start_worker(cfg: &Config, runtime: SharedRuntime) -> Result<WorkerHandle, String> {
    let poll = Duration::from_millis(cfg.transport.poll_interval_ms);
    match cfg.transport.kind.as_str() {
        "proxy" => {
            let base_url = cfg
                .transport
                .base_url
                .as_deref()
                .ok_or_else(|| "transport.base_url is required for proxy transport".to_string())?;
            let exec = ProxyExecutor::new(base_url, cfg.transport.timeout_ms)
                .map_err(|e| e.to_string())?;
            Ok(start_decision_worker(runtime, Arc::new(exec), poll))
        }
        _ => Ok(start_decision_worker(
            runtime,
            Arc::new(LocalBrainExecutor::new(cfg.transport.seed)),
            poll,
        )),
    }
}

/// Real-time run: 30 Hz frames feeding the fixed-step loop.
async fn simulate(cfg: Config, seconds: u64) -> Result<(), String> {
    let runtime: SharedRuntime = Arc::new(Mutex::new(EngineRuntime::new(
        RuntimeLimits::from_config(&cfg.engine),
    )));
    let worker = start_worker(&cfg, runtime.clone())?;

    let mut pipeline = TickPipeline::new(
        HostelOps::default(),
        Scheduler::new(SchedulerConfig::from_config(&cfg.engine)),
        Arc::new(SystemClock),
        PipelineConfig::from_config(&cfg.engine),
    );
    let mut world = generate_world(cfg.world.seed, cfg.world.agents);
    let mut fixed = FixedStepLoop::default();
    let mut frames = tokio::time::interval(Duration::from_millis(33));
    info!(
        agents = cfg.world.agents,
        seed = cfg.world.seed,
        transport = %cfg.transport.kind,
        seconds,
        "simulation started"
    );

    let started = Instant::now();
    let mut last = started;
    while started.elapsed() < Duration::from_secs(seconds) {
        frames.tick().await;
        let now = Instant::now();
        let real_dt = now.duration_since(last).as_secs_f64();
        last = now;

        let mut rt = runtime
            .lock()
            .map_err(|_| "engine runtime lock poisoned".to_string())?;
        fixed.frame(real_dt, &mut rt, |rt, sim_dt, tick| {
            let out = pipeline.tick(rt, &world, sim_dt, tick);
            world = out.world;
        });
    }
    worker.stop().await;

    let rt = runtime
        .lock()
        .map_err(|_| "engine runtime lock poisoned".to_string())?;
    let applied: u64 = world.agents.iter().map(|a| a.decisions_applied).sum();
    let metrics = serde_json::to_string(rt.metrics()).map_err(|e| e.to_string())?;
    info!(
        ticks = fixed.engine_tick(),
        decisions_applied = applied,
        in_flight = rt.in_flight_len(),
        queued = rt.queue_len(),
        metrics = %metrics,
        "simulation finished"
    );
    Ok(())
}

fn headless(args: &[String]) -> Result<(), String> {
    let defaults = HeadlessConfig::default();
    let num = |name: &str, default: u64| {
        flag_value(args, name).map_or(default, |v| parse_num(name, &v))
    };
    let cfg = HeadlessConfig {
        seed: num("--seed", defaults.seed),
        agents: num("--agents", defaults.agents as u64) as usize,
        ticks: num("--ticks", defaults.ticks),
        checkpoint_every: num("--checkpoint-every", defaults.checkpoint_every),
        ..defaults
    };

    let report = run_headless(&cfg).map_err(|e| e.to_string())?;
    let text = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    println!("{text}");

    match (flag_value(args, "--golden"), has_flag(args, "--write-golden")) {
        (Some(path), true) => {
            record_golden(Path::new(&path), &report.key, report.golden_run())
                .map_err(|e| e.to_string())?;
            info!(path = %path, key = %report.key, "golden recorded");
        }
        (Some(path), false) => {
            verify_golden(Path::new(&path), &report.key, &report.golden_run())
                .map_err(|e| e.to_string())?;
            info!(path = %path, key = %report.key, "golden verified");
        }
        (None, true) => return Err("--write-golden requires --golden <path>".to_string()),
        (None, false) => {}
    }
    Ok(())
}
