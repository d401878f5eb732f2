//! End-to-end delivery tests driving the public crate surface: environment
//! capture, configuration projection, record emission over both transports,
//! and delivery introspection.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gelf_client_core::{
    AmbientContext, FailureReason, FieldMap, FieldValue, Logger, LoggerConfig, LoggerEnv,
    RequestDescriptor, Severity, StreamState, TransportMode,
};
use httptest::matchers::{all_of, contains, matches, request};
use httptest::{responders::status_code, Expectation, Server};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

/// A scripted websocket collector: captured text frames plus the task
/// driving the listener.
struct Collector {
    addr: SocketAddr,
    frames: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

/// Spawns a collector that acknowledges credential handshakes and records
/// every text frame in arrival order.
async fn spawn_collector() -> Collector {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let frames = Arc::new(Mutex::new(Vec::new()));
    let task_frames = Arc::clone(&frames);
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let mut socket = match accept_async(stream).await {
                Ok(socket) => socket,
                Err(_) => continue,
            };
            while let Some(Ok(frame)) = socket.next().await {
                let WsMessage::Text(text) = frame else {
                    continue;
                };
                let is_auth = text.contains("\"type\":\"auth\"");
                task_frames.lock().unwrap().push(text);
                if is_auth {
                    let ack = r#"{"type":"auth_ack"}"#.to_string();
                    if socket.send(WsMessage::Text(ack)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    Collector {
        addr,
        frames,
        handle,
    }
}

/// Polls `condition` every 10ms until it holds or `limit` elapses.
async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

/// A record built from an environment capture and a request snapshot
/// reaches the collector with every field layer applied.
#[tokio::test]
async fn http_delivery_from_captured_environment() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", "/ingest"),
            request::headers(contains(("content-type", "application/json"))),
            request::body(matches("\"version\":\"1.1\"")),
            request::body(matches("\"host\":\"edge-7\"")),
            request::body(matches("\"facility\":\"checkout\"")),
            request::body(matches("\"level\":3")),
            request::body(matches("\"_log_session_id\":\"e2e-session\"")),
            request::body(matches("\"_environment\":\"production\"")),
            request::body(matches("\"_client_ip\":\"203.0.113.9\"")),
            request::body(matches("\"_user_agent\":\"checkout-edge/4.2\"")),
            request::body(matches("\"_order_id\":\"ord-233\"")),
        ])
        .respond_with(status_code(202)),
    );
    let url = server.url_str("/ingest");
    let env = LoggerEnv::from_env_iter([
        ("GELF_URL", url.as_str()),
        ("GELF_HOST", "edge-7"),
        ("GELF_FACILITY", "checkout"),
        ("GELF_MIN_LEVEL", "debug"),
        ("GELF_SESSION_ID", "e2e-session"),
        ("GELF_ENVIRONMENT", "production"),
    ]);
    let snapshot = RequestDescriptor {
        method: "POST".to_string(),
        path: "/api/orders".to_string(),
        headers: BTreeMap::from([
            (
                "X-Forwarded-For".to_string(),
                "203.0.113.9, 10.0.0.2".to_string(),
            ),
            ("User-Agent".to_string(), "checkout-edge/4.2".to_string()),
        ]),
        geo: None,
    };
    let config = LoggerConfig::from_env(&env);
    assert_eq!(config.mode, TransportMode::Http);
    let logger = Logger::new(config, AmbientContext::from_parts(&env, Some(&snapshot)))
        .expect("logger construction");

    logger.error_with(
        "order persist failed",
        None,
        FieldMap::from([("order_id".to_string(), FieldValue::from("ord-233"))]),
    );
    logger.flush().await;

    let stats = logger.stats();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(logger.session_id(), "e2e-session");
}

/// The stream transport authenticates, drains records in order over one
/// connection, and tears down cleanly on shutdown.
#[tokio::test(flavor = "multi_thread")]
async fn stream_delivery_with_handshake_and_shutdown() {
    let collector = spawn_collector().await;
    let config = LoggerConfig {
        mode: TransportMode::Stream,
        stream_endpoint: Some(format!("ws://{}", collector.addr)),
        min_level: Severity::Debug,
        access_id: Some("service-key".to_string()),
        access_secret: Some("service-secret".to_string()),
        session_id: Some("stream-session".to_string()),
        auth_timeout: Duration::from_millis(500),
        reconnect_base_delay: Duration::from_millis(25),
        ..LoggerConfig::default()
    };
    let logger = Logger::new(config, AmbientContext::default()).expect("logger construction");

    logger.info("stream-1");
    logger.warning("stream-2");
    logger.flush().await;

    assert!(
        wait_until(Duration::from_secs(2), || collector
            .frames
            .lock()
            .unwrap()
            .len()
            == 3)
        .await,
        "expected handshake plus two records"
    );
    {
        let frames = collector.frames.lock().unwrap();
        assert!(frames[0].contains("\"type\":\"auth\""));
        assert!(frames[0].contains("\"access_id\":\"service-key\""));
        assert!(frames[0].contains("\"log_session_id\":\"stream-session\""));
        assert!(frames[1].contains("\"short_message\":\"stream-1\""));
        assert!(frames[1].contains("\"level\":6"));
        assert!(frames[2].contains("\"short_message\":\"stream-2\""));
        assert!(frames[2].contains("\"level\":4"));
    }
    assert_eq!(logger.stats().sent, 2);
    assert_eq!(logger.stream_state(), Some(StreamState::Open));

    logger.shutdown().await;
    assert_eq!(logger.stream_state(), Some(StreamState::Disconnected));
    collector.handle.abort();
}

/// Skips and failures are visible through the introspection surface, and
/// clearing history leaves the counters intact.
#[tokio::test]
async fn delivery_failures_are_introspectable() {
    let env = LoggerEnv::from_env_iter([("GELF_MIN_LEVEL", "informational")]);
    let logger =
        Logger::new(LoggerConfig::from_env(&env), AmbientContext::default())
            .expect("logger construction");

    logger.debug("below the floor");
    logger.error("undeliverable");

    let stats = logger.stats();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(
        logger.failure_summary().get(&FailureReason::NoEndpoint),
        Some(&1)
    );
    let failures = logger.failed_records(Some(10));
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].record.short_message, "undeliverable");
    assert!(failures[0].endpoint.is_none());

    logger.clear_failed_records();
    assert!(logger.failed_records(None).is_empty());
    assert_eq!(logger.stats().failed, 1);
}
