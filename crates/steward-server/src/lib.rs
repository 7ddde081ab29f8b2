use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use steward_config::Config;
use steward_contracts::{DecideBody, DecisionResult, ErrorBody, ErrorResponse};
use steward_kernel::{canonical_json, l0_decide, now_ms, DEFAULT_L0_WORLD_MAP};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub mod cache;
pub mod rate_limit;
pub mod store;
pub mod validate;

use cache::IdempotencyCache;
pub use rate_limit::{NowFn, TokenBucket};
pub use store::{object_key, ObjectStore, PutOutcome, StoreError};
pub use validate::{validate_decide, ValidatedDecide};

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let mode = cfg.proxy.mode.clone();
    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, mode = %mode, "replay proxy listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    build_app_with_clock(cfg, Arc::new(now_ms)).await
}

/// Same as [`build_app`] with an injected millisecond clock.
pub async fn build_app_with_clock(cfg: Config, now: NowFn) -> Result<Router, String> {
    let body_limit = cfg.server.body_limit_bytes;
    let state = AppState::new(cfg, now)?;
    // probes sit outside the body limit and never parse anything
    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(healthz))
        .route(
            "/decide",
            post(decide).layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    Live,
    Record,
    Replay,
}

impl ProxyMode {
    pub fn parse(mode: &str) -> Result<Self, String> {
        match mode {
            "live" => Ok(Self::Live),
            "record" => Ok(Self::Record),
            "replay" => Ok(Self::Replay),
            other => Err(format!("unsupported proxy.mode={other}")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Record => "record",
            Self::Replay => "replay",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),
    #[error("replay miss for requestId {request_id}")]
    ReplayMiss { request_id: String },
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::ReplayMiss { request_id } => (
                StatusCode::NOT_FOUND,
                "replay_miss",
                self.to_string(),
                Some(json!({ "requestId": request_id })),
            ),
            Self::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
                None,
            ),
            Self::Store(_) | Self::Internal(_) => {
                error!(error = %self, "decide failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_error".to_string(),
                    None,
                )
            }
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    mode: ProxyMode,
    prefix: String,
    provider_seed: u64,
    now: NowFn,
    bucket: Arc<Mutex<TokenBucket>>,
    cache: Arc<Mutex<IdempotencyCache>>,
    store: Option<Arc<Mutex<ObjectStore>>>,
}

struct Served {
    body: Vec<u8>,
    cache_hit: bool,
    fallback: bool,
}

impl AppState {
    fn new(cfg: Config, now: NowFn) -> Result<Self, String> {
        let mode = ProxyMode::parse(&cfg.proxy.mode)?;
        let store = ObjectStore::from_config(&cfg.store).map_err(|e| e.to_string())?;
        match (&store, mode) {
            (None, ProxyMode::Record | ProxyMode::Replay) => warn!(
                mode = mode.as_str(),
                "no durable store configured; every /decide will answer config_error"
            ),
            (Some(s), ProxyMode::Live) => info!(
                store = s.kind(),
                "live mode never writes to the durable store"
            ),
            _ => {}
        }
        let bucket = TokenBucket::new(
            cfg.proxy.rate_limit_rps,
            cfg.proxy.rate_limit_burst,
            now.clone(),
        );
        Ok(Self {
            mode,
            prefix: cfg.store.prefix.clone(),
            provider_seed: cfg.proxy.provider_seed,
            now,
            bucket: Arc::new(Mutex::new(bucket)),
            cache: Arc::new(Mutex::new(IdempotencyCache::new(cfg.proxy.idempotency_ttl_ms))),
            store: store.map(|s| Arc::new(Mutex::new(s))),
        })
    }

    fn compute(&self, body: &DecideBody, created_at_ms: u64) -> DecisionResult {
        let decision = l0_decide(
            &body.request.request_id,
            &body.request.agent_id,
            &body.context,
            self.provider_seed,
            &DEFAULT_L0_WORLD_MAP,
        );
        DecisionResult::for_request(&body.request, created_at_ms, decision)
    }

    async fn live(&self, input: &ValidatedDecide, now_ms: u64) -> Result<Served, ProxyError> {
        let request_id = &input.body.request.request_id;
        let mut cache = self.cache.lock().await;
        cache.sweep(now_ms);
        if let Some(hit) = cache.get(request_id, now_ms) {
            return Ok(Served {
                body: hit.to_vec(),
                cache_hit: true,
                fallback: false,
            });
        }

        let admitted = self.bucket.lock().await.try_take(1.0);
        let result = if admitted {
            self.compute(&input.body, now_ms)
        } else {
            let mut limited = input.fallback.clone();
            limited.created_at_ms = now_ms;
            limited.decision.reason = "rate_limited".to_string();
            limited
        };
        let body = encode(&result)?;
        cache.insert(request_id, body.clone(), now_ms);
        Ok(Served {
            body,
            cache_hit: false,
            fallback: !admitted,
        })
    }

    /// Record and replay: stored bytes are returned untouched.
    async fn durable(&self, input: &ValidatedDecide) -> Result<Served, ProxyError> {
        let request = &input.body.request;
        let store = self.store.as_ref().ok_or_else(|| {
            ProxyError::Config(format!(
                "proxy.mode={} requires a durable store (store.type is none)",
                self.mode.as_str()
            ))
        })?;
        let key = object_key(&self.prefix, &request.prompt_version, &request.request_id);

        let mut store = store.lock().await;
        if let Some(body) = store.get(&key)? {
            return Ok(Served {
                body,
                cache_hit: true,
                fallback: false,
            });
        }
        if self.mode == ProxyMode::Replay {
            error!(
                request_id = %request.request_id,
                agent_id = %request.agent_id,
                key = %key,
                "replay miss"
            );
            return Err(ProxyError::ReplayMiss {
                request_id: request.request_id.clone(),
            });
        }

        // createdAtMs comes from the request so a re-record reproduces the same bytes
        let body = encode(&self.compute(&input.body, request.created_at_ms))?;
        let (body, lost_race) = write_once(&mut store, &key, body)?;
        Ok(Served {
            body,
            cache_hit: lost_race,
            fallback: false,
        })
    }
}

/// Create-only write. When another writer got there first its bytes win and
/// the second value is `true`.
fn write_once(
    store: &mut ObjectStore,
    key: &str,
    body: Vec<u8>,
) -> Result<(Vec<u8>, bool), ProxyError> {
    match store.put_if_absent(key, &body)? {
        PutOutcome::Created => Ok((body, false)),
        PutOutcome::Exists => {
            let winner = store.get(key)?.ok_or_else(|| {
                ProxyError::Internal(format!("object {key} missing after losing create race"))
            })?;
            Ok((winner, true))
        }
    }
}

fn encode(result: &DecisionResult) -> Result<Vec<u8>, ProxyError> {
    canonical_json(result)
        .map(String::into_bytes)
        .map_err(ProxyError::Internal)
}

fn action_of(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value["decision"]["action"].as_str().map(str::to_string)
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn decide(State(state): State<AppState>, raw: Bytes) -> Result<Response, ProxyError> {
    let started = Instant::now();
    let now_ms = (state.now)();
    let input = validate_decide(&raw, now_ms).map_err(|msg| {
        warn!(error = %msg, "rejected /decide body");
        ProxyError::BadRequest(msg)
    })?;

    let served = match state.mode {
        ProxyMode::Live => state.live(&input, now_ms).await?,
        ProxyMode::Record | ProxyMode::Replay => state.durable(&input).await?,
    };

    let request = &input.body.request;
    info!(
        request_id = %request.request_id,
        agent_id = %request.agent_id,
        intent_id = %request.intent_id,
        action = action_of(&served.body).as_deref().unwrap_or("-"),
        latency_ms = started.elapsed().as_millis() as u64,
        cache_hit = served.cache_hit,
        fallback = served.fallback,
        mode = state.mode.as_str(),
        "decide"
    );
    Ok(([(header::CONTENT_TYPE, "application/json")], served.body).into_response())
}
