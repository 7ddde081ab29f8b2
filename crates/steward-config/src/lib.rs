use serde::{Deserialize, Serialize};
use steward_contracts::MAX_TTL_MS;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

pub const MAX_TRANSPORT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    #[serde(default)]
    pub proxy: Proxy,
    pub store: Store,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub world: World,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    /// One of `live`, `record`, `replay`.
    pub mode: String,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: f64,
    #[serde(default = "default_idempotency_ttl_ms")]
    pub idempotency_ttl_ms: u64,
    #[serde(default)]
    pub provider_seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    /// One of `none`, `memory`, `filesystem`, `sqlite`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_store_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests_total: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
    #[serde(default = "default_inflight_timeout_ms")]
    pub inflight_timeout_ms: u64,
    #[serde(default = "default_events_ring_max")]
    pub events_ring_max: usize,
    #[serde(default = "default_intent_sweep_every_ticks")]
    pub intent_sweep_every_ticks: u64,
    #[serde(default = "default_allowlist_actions")]
    pub allowlist_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transport {
    /// One of `local`, `proxy`.
    pub kind: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_transport_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_world_agents")]
    pub agents: usize,
}

impl Default for Proxy {
    fn default() -> Self {
        Self {
            mode: "live".to_string(),
            rate_limit_rps: default_rate_limit_rps(),
            rate_limit_burst: default_rate_limit_burst(),
            idempotency_ttl_ms: default_idempotency_ttl_ms(),
            provider_seed: 0,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            max_concurrent_requests_total: default_max_concurrent(),
            max_queue_size: default_max_queue_size(),
            cooldown_ms: default_cooldown_ms(),
            ttl_ms: default_ttl_ms(),
            prompt_version: default_prompt_version(),
            inflight_timeout_ms: default_inflight_timeout_ms(),
            events_ring_max: default_events_ring_max(),
            intent_sweep_every_ticks: default_intent_sweep_every_ticks(),
            allowlist_actions: default_allowlist_actions(),
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            kind: "local".to_string(),
            base_url: None,
            timeout_ms: default_transport_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            seed: 0,
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self {
            seed: 0,
            agents: default_world_agents(),
        }
    }
}

fn default_body_limit_bytes() -> usize {
    64 * 1024
}

fn default_rate_limit_rps() -> f64 {
    20.0
}

fn default_rate_limit_burst() -> f64 {
    40.0
}

fn default_idempotency_ttl_ms() -> u64 {
    60_000
}

fn default_store_prefix() -> String {
    "decisions".to_string()
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_queue_size() -> usize {
    100
}

fn default_cooldown_ms() -> u64 {
    2_000
}

fn default_ttl_ms() -> u64 {
    20_000
}

fn default_prompt_version() -> String {
    "l0-v1".to_string()
}

fn default_inflight_timeout_ms() -> u64 {
    60_000
}

fn default_events_ring_max() -> usize {
    1_000
}

fn default_intent_sweep_every_ticks() -> u64 {
    60
}

pub fn default_allowlist_actions() -> Vec<String> {
    [
        "IDLE",
        "WANDER",
        "GO_TO_ROOM",
        "EAT_IN_KITCHEN",
        "REST_IN_DORM",
        "TALK_TO_AGENT",
        "CALM_SOMEONE",
        "START_CONFLICT",
        "REPORT_TO_GUARD",
    ]
    .iter()
    .map(|v| v.to_string())
    .collect()
}

fn default_transport_timeout_ms() -> u64 {
    MAX_TRANSPORT_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_world_agents() -> usize {
    8
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

/// Checks the combinations the schema cannot express.
///
/// `record`/`replay` without a durable store is deliberately accepted here: the
/// proxy answers such requests with `config_error` instead of refusing to boot.
pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if !matches!(cfg.proxy.mode.as_str(), "live" | "record" | "replay") {
        return Err(ConfigError::UnsupportedConfig(format!(
            "proxy.mode={} is not implemented; supported: live, record, replay",
            cfg.proxy.mode
        )));
    }
    if !matches!(
        cfg.store.kind.as_str(),
        "none" | "memory" | "filesystem" | "sqlite"
    ) {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: none, memory, filesystem, sqlite",
            cfg.store.kind
        )));
    }
    let has_path = cfg
        .store
        .path
        .as_ref()
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    if matches!(cfg.store.kind.as_str(), "filesystem" | "sqlite") && !has_path {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.path is required when store.type={}",
            cfg.store.kind
        )));
    }
    if matches!(cfg.store.kind.as_str(), "none" | "memory") && cfg.store.path.is_some() {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.path is not supported when store.type={}",
            cfg.store.kind
        )));
    }
    if cfg.proxy.rate_limit_rps <= 0.0 || cfg.proxy.rate_limit_burst < 1.0 {
        return Err(ConfigError::UnsupportedConfig(
            "proxy.rate_limit_rps must be > 0 and proxy.rate_limit_burst >= 1".to_string(),
        ));
    }
    if cfg.engine.ttl_ms == 0 || cfg.engine.ttl_ms > MAX_TTL_MS {
        return Err(ConfigError::UnsupportedConfig(format!(
            "engine.ttl_ms must be in (0, {MAX_TTL_MS}]"
        )));
    }
    if cfg.engine.max_concurrent_requests_total == 0 || cfg.engine.max_queue_size == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "engine.max_concurrent_requests_total and engine.max_queue_size must be >= 1"
                .to_string(),
        ));
    }
    if cfg.engine.allowlist_actions.is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "engine.allowlist_actions must not be empty".to_string(),
        ));
    }
    if cfg.engine.intent_sweep_every_ticks == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "engine.intent_sweep_every_ticks must be >= 1".to_string(),
        ));
    }
    match cfg.transport.kind.as_str() {
        "local" => {}
        "proxy" => {
            if cfg
                .transport
                .base_url
                .as_ref()
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
            {
                return Err(ConfigError::UnsupportedConfig(
                    "transport.base_url is required when transport.kind=proxy".to_string(),
                ));
            }
        }
        other => {
            return Err(ConfigError::UnsupportedConfig(format!(
                "transport.kind={other} is not implemented; supported: local, proxy"
            )))
        }
    }
    if cfg.transport.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "transport.timeout_ms must be >= 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp_config(contents: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("steward-config-test-{nanos}.yaml"));
        std::fs::write(&path, contents).expect("write temp config");
        path.to_string_lossy().to_string()
    }

    fn base_yaml() -> String {
        r#"
server:
  listen_addr: "127.0.0.1:0"

proxy:
  mode: "live"

store:
  type: "none"

engine:
  max_concurrent_requests_total: 4
  max_queue_size: 16
  cooldown_ms: 1500
  ttl_ms: 20000

transport:
  kind: "local"
"#
        .to_string()
    }

    #[test]
    fn loads_base_config_with_defaults() {
        let path = write_temp_config(&base_yaml());
        let cfg = load_and_validate(&path).expect("base config should be accepted");
        assert_eq!(cfg.engine.max_concurrent_requests_total, 4);
        assert_eq!(cfg.engine.inflight_timeout_ms, 60_000);
        assert_eq!(cfg.proxy.idempotency_ttl_ms, 60_000);
        assert_eq!(cfg.server.body_limit_bytes, 64 * 1024);
        assert!(cfg.engine.allowlist_actions.iter().any(|a| a == "WANDER"));
    }

    #[test]
    fn supports_sqlite_store_type_with_path() {
        let path = write_temp_config(&base_yaml().replace(
            "type: \"none\"",
            "type: \"sqlite\"\n  path: \"./decisions.db\"",
        ));
        let cfg = load_and_validate(&path).expect("sqlite config should be accepted");
        assert_eq!(cfg.store.kind, "sqlite");
        assert_eq!(cfg.store.path.as_deref(), Some("./decisions.db"));
        assert_eq!(cfg.store.prefix, "decisions");
    }

    #[test]
    fn rejects_filesystem_store_without_path() {
        let path =
            write_temp_config(&base_yaml().replace("type: \"none\"", "type: \"filesystem\""));
        let err = load_and_validate(&path).expect_err("expected unsupported config");
        assert!(matches!(
            err,
            ConfigError::SchemaValidation(_) | ConfigError::UnsupportedConfig(_)
        ));
    }

    #[test]
    fn record_mode_without_store_still_loads() {
        let path = write_temp_config(&base_yaml().replace("mode: \"live\"", "mode: \"record\""));
        let cfg = load_and_validate(&path).expect("record without store is a request-time error");
        assert_eq!(cfg.proxy.mode, "record");
        assert_eq!(cfg.store.kind, "none");
    }

    #[test]
    fn rejects_ttl_above_proxy_limit() {
        let path = write_temp_config(&base_yaml().replace("ttl_ms: 20000", "ttl_ms: 120001"));
        let err = load_and_validate(&path).expect_err("expected ttl rejection");
        assert!(matches!(
            err,
            ConfigError::SchemaValidation(_) | ConfigError::UnsupportedConfig(_)
        ));
    }

    #[test]
    fn rejects_proxy_transport_without_base_url() {
        let path = write_temp_config(&base_yaml().replace("kind: \"local\"", "kind: \"proxy\""));
        let err = load_and_validate(&path).expect_err("expected unsupported config");
        assert!(matches!(err, ConfigError::UnsupportedConfig(_)));
    }

    #[test]
    fn rejects_unknown_proxy_mode() {
        let path = write_temp_config(&base_yaml().replace("mode: \"live\"", "mode: \"shadow\""));
        let err = load_and_validate(&path).expect_err("expected unsupported config");
        assert!(matches!(
            err,
            ConfigError::SchemaValidation(_) | ConfigError::UnsupportedConfig(_)
        ));
    }
}
