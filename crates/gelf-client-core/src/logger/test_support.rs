//! Shared fixtures and utilities for logger tests.
//!
//! Consolidating these helpers keeps individual test modules focused on
//! their assertions while avoiding duplication of setup logic.

#![cfg(test)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

use super::config::{LoggerConfig, TransportMode};
use super::Logger;
use crate::config::AmbientContext;
use crate::severity::Severity;

/// Base configuration for the one-shot HTTP path: everything admitted,
/// short request timeout.
pub(crate) fn http_config(endpoint: &str) -> LoggerConfig {
    LoggerConfig {
        mode: TransportMode::Http,
        endpoint: Some(endpoint.to_string()),
        min_level: Severity::Debug,
        send_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Base configuration for the stream path with timers short enough for
/// tests: a 250ms auth window and a 25ms reconnect base with 3 attempts.
pub(crate) fn stream_config(addr: SocketAddr) -> LoggerConfig {
    LoggerConfig {
        mode: TransportMode::Stream,
        stream_endpoint: Some(format!("ws://{addr}")),
        min_level: Severity::Debug,
        auth_timeout: Duration::from_millis(250),
        reconnect_base_delay: Duration::from_millis(25),
        max_reconnect_attempts: 3,
        ..Default::default()
    }
}

/// Adds the fixture access credentials to a configuration.
pub(crate) fn with_access(mut config: LoggerConfig) -> LoggerConfig {
    config.access_id = Some("key-id".to_string());
    config.access_secret = Some("key-secret".to_string());
    config
}

/// Builds a logger from a configuration with an empty ambient capture.
pub(crate) fn logger_with(config: LoggerConfig) -> Logger {
    Logger::new(config, AmbientContext::default()).expect("logger construction")
}

/// Builds an HTTP-mode logger with no endpoint configured.
pub(crate) fn disconnected_http_logger() -> Logger {
    logger_with(LoggerConfig {
        mode: TransportMode::Http,
        min_level: Severity::Debug,
        ..Default::default()
    })
}

/// Builds a stream-mode logger with no endpoint configured.
pub(crate) fn disconnected_stream_logger() -> Logger {
    logger_with(LoggerConfig {
        mode: TransportMode::Stream,
        min_level: Severity::Debug,
        ..Default::default()
    })
}

/// A websocket collector fixture: captured frames plus accept bookkeeping.
pub(crate) struct CollectorProbe {
    pub(crate) addr: SocketAddr,
    /// Every text frame received, in arrival order (handshakes included).
    pub(crate) frames: Arc<Mutex<Vec<String>>>,
    /// Number of connections accepted.
    pub(crate) accepts: Arc<AtomicUsize>,
    pub(crate) handle: JoinHandle<()>,
}

/// Spawns a collector that records every text frame and acknowledges auth
/// handshakes.
pub(crate) async fn spawn_acking_collector() -> CollectorProbe {
    spawn_collector(true).await
}

/// Spawns a collector that records every text frame but never answers, so
/// handshakes ride out their timer.
pub(crate) async fn spawn_mute_collector() -> CollectorProbe {
    spawn_collector(false).await
}

/// Spawns an acknowledging collector on an already-bound listener, for
/// tests that bring a collector back on a known address.
pub(crate) fn spawn_acking_collector_on(listener: TcpListener) -> CollectorProbe {
    collector_on(listener, true)
}

async fn spawn_collector(ack_auth: bool) -> CollectorProbe {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    collector_on(listener, ack_auth)
}

fn collector_on(listener: TcpListener, ack_auth: bool) -> CollectorProbe {
    let addr = listener.local_addr().unwrap();
    let frames = Arc::new(Mutex::new(Vec::new()));
    let accepts = Arc::new(AtomicUsize::new(0));
    let task_frames = Arc::clone(&frames);
    let task_accepts = Arc::clone(&accepts);
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            task_accepts.fetch_add(1, Ordering::SeqCst);
            let mut ws = match accept_async(stream).await {
                Ok(socket) => socket,
                Err(_) => continue,
            };
            while let Some(Ok(frame)) = ws.next().await {
                let WsMessage::Text(text) = frame else {
                    continue;
                };
                let is_auth = is_auth_frame(&text);
                task_frames.lock().unwrap().push(text);
                if is_auth && ack_auth {
                    let ack = r#"{"type":"auth_ack"}"#.to_string();
                    if ws.send(WsMessage::Text(ack)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    CollectorProbe {
        addr,
        frames,
        accepts,
        handle,
    }
}

/// Spawns a listener that accepts connections and drops them before the
/// websocket handshake completes, counting the attempts.
pub(crate) async fn spawn_rejecting_collector() -> (SocketAddr, Arc<AtomicUsize>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));
    let task_accepts = Arc::clone(&accepts);
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            task_accepts.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (addr, accepts, handle)
}

/// Spawns a bare HTTP server that answers `202 Accepted` only after the
/// given delay, for exercising flush waits.
pub(crate) async fn spawn_slow_http_server(delay: Duration) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            tokio::time::sleep(delay).await;
            let _ = stream
                .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\n\r\n")
                .await;
        }
    });
    (addr, handle)
}

/// The frames a collector captured that are delivery records rather than
/// handshakes.
pub(crate) fn record_frames(frames: &Mutex<Vec<String>>) -> Vec<String> {
    frames
        .lock()
        .unwrap()
        .iter()
        .filter(|frame| !is_auth_frame(frame))
        .cloned()
        .collect()
}

fn is_auth_frame(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("type").and_then(|t| t.as_str().map(String::from)))
        .is_some_and(|frame_type| frame_type == "auth")
}

/// Polls `condition` every 10ms until it holds or `limit` elapses.
pub(crate) async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}
