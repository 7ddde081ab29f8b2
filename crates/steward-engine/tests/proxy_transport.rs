use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use steward_config::{Config, Proxy, Server, Store};
use steward_contracts::{DecideContext, DecisionRequest, DecisionResult};
use steward_engine::{
    start_decision_worker, DecisionExecutor, EngineRuntime, InFlight, ProxyExecutor,
    RuntimeLimits, SchedulerApi, TransportError,
};

fn proxy_config(mode: &str, store: &str) -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
            body_limit_bytes: 64 * 1024,
        },
        proxy: Proxy {
            mode: mode.to_string(),
            ..Proxy::default()
        },
        store: Store {
            kind: store.to_string(),
            path: None,
            prefix: "decisions".to_string(),
        },
        engine: Default::default(),
        transport: Default::default(),
        world: Default::default(),
    }
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn request(agent: &str, request_id: &str) -> DecisionRequest {
    DecisionRequest {
        request_id: request_id.to_string(),
        agent_id: agent.to_string(),
        intent_id: format!("{agent}:c0ffee"),
        context_hash: "c0ffee".to_string(),
        created_at_ms: 1_700_000_000_000,
        prompt_version: "l0-v1".to_string(),
        ttl_ms: 20_000,
        context: DecideContext {
            agent_id: agent.to_string(),
            room_id: "r3".to_string(),
            state: "IDLE".to_string(),
            needs: None,
            nearby_agents: None,
            rooms: None,
            allowlist_actions: vec!["IDLE".to_string(), "WANDER".to_string()],
        },
    }
}

#[tokio::test]
async fn proxy_round_trip_echoes_identity() {
    let app = steward_server::build_app(proxy_config("record", "memory"))
        .await
        .unwrap();
    let base = spawn(app).await;
    let exec = ProxyExecutor::new(&base, 2_000).unwrap();

    let req = request("agent-001", "req-proxy-1");
    let first = exec.execute(req.clone()).await.unwrap();
    let second = exec.execute(req.clone()).await.unwrap();
    assert_eq!(first, second);

    let result: DecisionResult = serde_json::from_value(first).unwrap();
    assert_eq!(result.request_id, "req-proxy-1");
    assert_eq!(result.intent_id, req.intent_id);
    assert_eq!(result.created_at_ms, req.created_at_ms);
}

#[tokio::test]
async fn slow_proxy_is_a_distinguishable_timeout() {
    let slow = Router::new().route(
        "/decide",
        post(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "{}"
        }),
    );
    let base = spawn(slow).await;
    let exec = ProxyExecutor::new(&base, 100).unwrap();

    match exec.execute(request("agent-001", "req-slow")).await {
        Err(TransportError::Timeout(ms)) => assert_eq!(ms, 100),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn replay_miss_surfaces_as_status_error() {
    let app = steward_server::build_app(proxy_config("replay", "memory"))
        .await
        .unwrap();
    let base = spawn(app).await;
    let exec = ProxyExecutor::new(&base, 2_000).unwrap();

    match exec.execute(request("agent-001", "req-missing")).await {
        Err(TransportError::Status { status, body }) => {
            assert_eq!(status, 404);
            assert!(body.contains("replay_miss"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn worker_drives_requests_through_the_proxy() {
    let app = steward_server::build_app(proxy_config("live", "none"))
        .await
        .unwrap();
    let base = spawn(app).await;
    let exec = Arc::new(ProxyExecutor::new(&base, 2_000).unwrap());

    let mut rt = EngineRuntime::new(RuntimeLimits::default());
    {
        let mut api = SchedulerApi::new(&mut rt);
        for agent in ["agent-001", "agent-002"] {
            let req = request(agent, &format!("req-{agent}"));
            api.set_in_flight(InFlight {
                request_id: req.request_id.clone(),
                intent_id: req.intent_id.clone(),
                agent_id: agent.to_string(),
                started_at_ms: 0,
            });
            api.enqueue(req);
        }
    }
    let shared = Arc::new(Mutex::new(rt));
    let handle = start_decision_worker(shared.clone(), exec, Duration::from_millis(5));

    let mut delivered = Vec::new();
    for _ in 0..400 {
        delivered.extend(shared.lock().unwrap().drain_decisions());
        if delivered.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stop().await;

    let mut ids: Vec<String> = delivered
        .iter()
        .map(|v| v["requestId"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["req-agent-001", "req-agent-002"]);
    assert_eq!(shared.lock().unwrap().metrics().requests_failed_total, 0);
}
