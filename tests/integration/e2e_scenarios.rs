//! End-to-end integration harness: a real broker axum server bound to a
//! loopback port, driven over real WebSocket/HTTP sockets by
//! `MockAgentClient` (standing in for an agent process) and `reqwest`
//! (standing in for a public client). No shortcuts through broker
//! internals — every assertion observes wire-visible behavior.
//!
//! Covers the six literal end-to-end scenarios from the external interface
//! section: unary success, streaming, forced preemption, heartbeat
//! timeout, request timeout, and duplicate connect without force.

use std::time::Duration;

use broker::memstore::InMemoryDomainStore;
use broker::AppState;
use tunely_protocol::{Auth, DomainMode, DomainRecord, Message};
use tunely_test_utils::MockAgentClient;

/// Start an in-process broker with the given config and return its base
/// HTTP and WebSocket URLs.
async fn start_broker(cfg: broker::config::BrokerConfig, store: std::sync::Arc<InMemoryDomainStore>) -> (String, String) {
    let control_path = cfg.control_path.clone();
    let state = AppState::new(store, cfg);
    let router = broker::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind broker");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("broker error");
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (format!("http://{addr}"), format!("ws://{addr}{control_path}"))
}

fn demo_record(token: &str) -> DomainRecord {
    DomainRecord {
        domain: "demo".to_owned(),
        token: token.to_owned(),
        enabled: true,
        mode: DomainMode::Http,
    }
}

async fn connect_and_auth(ws_url: &str, token: &str, force: bool) -> MockAgentClient {
    let mut client = MockAgentClient::connect(ws_url).await.expect("connect failed");
    client
        .send(&Message::Auth(Auth {
            token: token.to_owned(),
            client_version: None,
            force: Some(force),
        }))
        .await
        .expect("send AUTH failed");
    client
}

// ---------------------------------------------------------------------------
// Scenario 1: unary success.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unary_success_returns_the_agents_response_body_and_status() {
    let store = InMemoryDomainStore::new();
    store.insert(demo_record("T")).await;
    let (http_url, ws_url) = start_broker(broker::config::BrokerConfig::default(), store).await;

    let mut agent = connect_and_auth(&ws_url, "T", false).await;
    match agent.recv().await.unwrap() {
        Message::AuthOk(ok) => assert_eq!(ok.domain, "demo"),
        other => panic!("expected AUTH_OK, got {other:?}"),
    }

    let client = reqwest::Client::new();
    let forward = tokio::spawn({
        let http_url = http_url.clone();
        async move {
            client
                .post(format!("{http_url}/api/tunnels/demo/forward"))
                .json(&serde_json::json!({"method": "GET", "path": "/ping"}))
                .send()
                .await
                .unwrap()
        }
    });

    let request = match agent.recv().await.unwrap() {
        Message::Request(req) => req,
        other => panic!("expected REQUEST, got {other:?}"),
    };
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/ping");

    agent
        .send(&Message::Response(tunely_protocol::Response {
            id: request.id,
            status: 200,
            headers: Default::default(),
            body: Some("pong".to_owned()),
            error: None,
            duration_ms: Some(5),
            timestamp: None,
        }))
        .await
        .unwrap();

    let response = forward.await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], 200);
    assert_eq!(body["body"], "pong");
}

// ---------------------------------------------------------------------------
// Scenario 2: streaming.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_response_relays_chunks_in_order_as_an_event_stream() {
    let store = InMemoryDomainStore::new();
    store.insert(demo_record("T")).await;
    let (http_url, ws_url) = start_broker(broker::config::BrokerConfig::default(), store).await;

    let mut agent = connect_and_auth(&ws_url, "T", false).await;
    assert!(matches!(agent.recv().await.unwrap(), Message::AuthOk(_)));

    let client = reqwest::Client::new();
    let forward = tokio::spawn({
        let http_url = http_url.clone();
        async move {
            client
                .post(format!("{http_url}/api/tunnels/demo/forward"))
                .json(&serde_json::json!({"method": "GET", "path": "/events"}))
                .send()
                .await
                .unwrap()
        }
    });

    let id = match agent.recv().await.unwrap() {
        Message::Request(req) => req.id,
        other => panic!("expected REQUEST, got {other:?}"),
    };

    agent
        .send(&Message::StreamStart(tunely_protocol::StreamStart {
            id: id.clone(),
            status: 200,
            headers: Default::default(),
            timestamp: None,
        }))
        .await
        .unwrap();
    for seq in 0..3u64 {
        agent
            .send(&Message::StreamChunk(tunely_protocol::StreamChunk {
                id: id.clone(),
                data: format!("data: {seq}\n\n"),
                sequence: Some(seq),
                timestamp: None,
            }))
            .await
            .unwrap();
    }
    agent
        .send(&Message::StreamEnd(tunely_protocol::StreamEnd {
            id: id.clone(),
            error: None,
            duration_ms: Some(3),
            total_chunks: Some(3),
            timestamp: None,
        }))
        .await
        .unwrap();

    let response = forward.await.unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap().to_owned();
    assert!(content_type.starts_with("text/event-stream"));
    let body = response.text().await.unwrap();
    assert_eq!(body, "data: 0\n\ndata: 1\n\ndata: 2\n\n");
}

// ---------------------------------------------------------------------------
// Scenario 3: forced preemption.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forced_auth_preempts_the_existing_session() {
    let store = InMemoryDomainStore::new();
    store.insert(demo_record("T")).await;
    let (_http_url, ws_url) = start_broker(broker::config::BrokerConfig::default(), store).await;

    let mut agent_a = connect_and_auth(&ws_url, "T", false).await;
    assert!(matches!(agent_a.recv().await.unwrap(), Message::AuthOk(_)));

    let mut agent_b = connect_and_auth(&ws_url, "T", true).await;
    match agent_b.recv().await.unwrap() {
        Message::AuthOk(ok) => assert_eq!(ok.domain, "demo"),
        other => panic!("expected AUTH_OK for B, got {other:?}"),
    }

    // A's channel is closed by the broker: its next receive observes the
    // connection going away rather than any further traffic.
    let a_outcome = agent_a.recv().await;
    assert!(a_outcome.is_err(), "preempted agent A's channel should close");
}

// ---------------------------------------------------------------------------
// Scenario 4: heartbeat timeout.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silent_agent_is_dropped_after_the_heartbeat_deadline() {
    let mut cfg = broker::config::BrokerConfig::default();
    cfg.heartbeat_interval_s = 1; // keep the test fast; deadline is 2.5x this
    let store = InMemoryDomainStore::new();
    store.insert(demo_record("T")).await;
    let (http_url, ws_url) = start_broker(cfg, store).await;

    let mut agent = connect_and_auth(&ws_url, "T", false).await;
    assert!(matches!(agent.recv().await.unwrap(), Message::AuthOk(_)));

    // The agent goes silent: receive (and discard) PINGs but never reply.
    let silence = tokio::spawn(async move {
        loop {
            match agent.recv().await {
                Ok(_) => continue,
                Err(_) => return,
            }
        }
    });

    // A forward started mid-way through the deadline window must still
    // resolve to a terminal outcome (502 session_closed) no later than the
    // session actually closes.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{http_url}/api/tunnels/demo/forward"))
        .json(&serde_json::json!({"method": "GET", "path": "/ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    tokio::time::timeout(Duration::from_secs(5), silence)
        .await
        .expect("agent channel should close once the heartbeat deadline passes")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Scenario 5: request timeout.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_timeout_returns_504_and_drops_a_late_reply() {
    let store = InMemoryDomainStore::new();
    store.insert(demo_record("T")).await;
    let (http_url, ws_url) = start_broker(broker::config::BrokerConfig::default(), store).await;

    let mut agent = connect_and_auth(&ws_url, "T", false).await;
    assert!(matches!(agent.recv().await.unwrap(), Message::AuthOk(_)));

    let client = reqwest::Client::new();
    let forward = tokio::spawn({
        let http_url = http_url.clone();
        async move {
            client
                .post(format!("{http_url}/api/tunnels/demo/forward"))
                .json(&serde_json::json!({"method": "GET", "path": "/slow", "timeout": 1}))
                .send()
                .await
                .unwrap()
        }
    });

    let id = match agent.recv().await.unwrap() {
        Message::Request(req) => req.id,
        other => panic!("expected REQUEST, got {other:?}"),
    };

    let response = forward.await.unwrap();
    assert_eq!(response.status(), 504);

    // The agent's reply finally arrives after the public client has already
    // moved on; the broker must not panic, and no observer is left waiting.
    agent
        .send(&Message::Response(tunely_protocol::Response {
            id,
            status: 200,
            headers: Default::default(),
            body: Some("too late".to_owned()),
            error: None,
            duration_ms: Some(5_000),
            timestamp: None,
        }))
        .await
        .unwrap();
    // Give the broker a moment to process (and silently drop) the late
    // frame, then confirm the channel is still healthy by sending a PING.
    tokio::time::sleep(Duration::from_millis(50)).await;
    agent.send(&Message::Ping(tunely_protocol::Ping { timestamp: None })).await.unwrap();
    match agent.recv().await.unwrap() {
        Message::Pong(_) => {}
        other => panic!("expected PONG after late response was dropped, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenario 6: duplicate connect, no force.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_connect_without_force_is_rejected_and_the_first_stays_bound() {
    let store = InMemoryDomainStore::new();
    store.insert(demo_record("T")).await;
    let (_http_url, ws_url) = start_broker(broker::config::BrokerConfig::default(), store).await;

    let mut agent_a = connect_and_auth(&ws_url, "T", false).await;
    assert!(matches!(agent_a.recv().await.unwrap(), Message::AuthOk(_)));

    let mut agent_b = connect_and_auth(&ws_url, "T", false).await;
    match agent_b.recv().await.unwrap() {
        Message::AuthError(err) => assert_eq!(err.code.as_deref(), Some("already_connected")),
        other => panic!("expected AUTH_ERROR for B, got {other:?}"),
    }
    assert!(agent_b.recv().await.is_err(), "B's channel should close after AUTH_ERROR");

    // A is unaffected: a PING/PONG round-trip still works.
    agent_a.send(&Message::Ping(tunely_protocol::Ping { timestamp: None })).await.unwrap();
    match agent_a.recv().await.unwrap() {
        Message::Pong(_) => {}
        other => panic!("expected PONG, got {other:?}"),
    }
}
