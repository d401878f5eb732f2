//! Persistent websocket delivery of GELF records.
//!
//! A logger lineage shares one duplex connection. Records enqueue into a
//! bounded FIFO queue and a single connection task drains them as text
//! frames, handling the optional access handshake, reconnection with
//! exponential backoff, and teardown. The lifecycle is an explicit state
//! machine advanced by discrete events, so transitions can be tested
//! without a socket in sight.

use crate::failure::{DeliveryTracker, FailedRecord, FailureReason};
use crate::pending::Completion;
use crate::record::GelfRecord;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Hard ceiling on the delay between reconnection attempts.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Frame type of the outbound credential handshake.
const AUTH_FRAME: &str = "auth";
/// Frame type acknowledging the handshake.
const AUTH_ACK_FRAME: &str = "auth_ack";

/// Lifecycle of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Authenticating,
    Open,
    Closing,
}

impl StreamState {
    /// Returns the lower-case name used in diagnostics.
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamState::Disconnected => "disconnected",
            StreamState::Connecting => "connecting",
            StreamState::Authenticating => "authenticating",
            StreamState::Open => "open",
            StreamState::Closing => "closing",
        }
    }

    /// Advances the lifecycle by one event. Events that make no sense in
    /// the current state leave it unchanged.
    pub(crate) fn apply(self, event: StreamEvent) -> StreamState {
        match (self, event) {
            (_, StreamEvent::CloseStarted) => StreamState::Closing,
            (StreamState::Closing, StreamEvent::Closed) => StreamState::Disconnected,
            (_, StreamEvent::ConnectionLost) => StreamState::Disconnected,
            (StreamState::Disconnected, StreamEvent::ConnectStarted) => StreamState::Connecting,
            (StreamState::Connecting, StreamEvent::Opened) => StreamState::Open,
            (StreamState::Connecting, StreamEvent::AuthStarted) => StreamState::Authenticating,
            (
                StreamState::Authenticating,
                StreamEvent::AuthAcknowledged | StreamEvent::AuthTimedOut,
            ) => StreamState::Open,
            (state, _) => state,
        }
    }
}

/// Discrete events advancing the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    ConnectStarted,
    Opened,
    AuthStarted,
    AuthAcknowledged,
    AuthTimedOut,
    ConnectionLost,
    CloseStarted,
    Closed,
}

/// Reconnection budget and delay schedule for one connection lineage.
///
/// Delays grow as `base * 2^attempts`, capped at [`MAX_RECONNECT_DELAY`];
/// a successful open restores the full budget.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Creates a policy with a full budget.
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempts: 0,
        }
    }

    /// Returns the delay before the next attempt and consumes one unit of
    /// budget, or `None` when the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(MAX_RECONNECT_DELAY)
            .min(MAX_RECONNECT_DELAY);
        self.attempts += 1;
        Some(delay)
    }

    /// Marks a successful open, restoring the full budget.
    pub fn register_open(&mut self) {
        self.attempts = 0;
    }

    /// Attempts consumed since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the budget is spent.
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Connection parameters captured at logger construction.
#[derive(Debug, Clone)]
pub(crate) struct StreamConfig {
    pub(crate) endpoint: Option<String>,
    pub(crate) access_id: Option<String>,
    pub(crate) access_secret: Option<String>,
    pub(crate) session_id: String,
    /// Deadline on connection establishment, upgrade included. A peer that
    /// accepts the socket but never finishes the handshake counts as a
    /// failed attempt.
    pub(crate) connect_timeout: Duration,
    pub(crate) auth_timeout: Duration,
    pub(crate) reconnect_base_delay: Duration,
    pub(crate) max_reconnect_attempts: u32,
    pub(crate) max_queued: usize,
}

impl StreamConfig {
    fn access_pair(&self) -> Option<(&str, &str)> {
        match (&self.access_id, &self.access_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

/// Credential handshake sent as the first frame after connecting.
#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    access_id: &'a str,
    access_secret: &'a str,
    log_session_id: &'a str,
}

/// Minimal view of an inbound control frame.
#[derive(Debug, Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    frame_type: String,
}

fn is_auth_ack(text: &str) -> bool {
    serde_json::from_str::<ControlFrame>(text)
        .map(|frame| frame.frame_type == AUTH_ACK_FRAME)
        .unwrap_or(false)
}

/// A queued record paired with its flush completion.
#[derive(Debug)]
struct QueuedRecord {
    record: GelfRecord,
    completion: Completion,
}

/// The outbound queue plus the terminal marker new sends check first.
#[derive(Debug, Default)]
struct Outbound {
    records: VecDeque<QueuedRecord>,
    /// Set when the stream is permanently down (budget exhausted or
    /// closed); new sends fail fast with this classification.
    closed: Option<(FailureReason, &'static str)>,
}

/// Reconnect bookkeeping and the connection task handle.
#[derive(Debug)]
struct Machine {
    state: StreamState,
    policy: ReconnectPolicy,
    worker: Option<JoinHandle<()>>,
    close_requested: bool,
}

/// State shared between every handle of a lineage and its connection task.
#[derive(Debug)]
pub(crate) struct StreamShared {
    config: StreamConfig,
    tracker: Arc<DeliveryTracker>,
    outbound: Mutex<Outbound>,
    machine: Mutex<Machine>,
    wake: Notify,
}

impl StreamShared {
    fn lock_outbound(&self) -> MutexGuard<'_, Outbound> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, event: StreamEvent) -> StreamState {
        let mut machine = self.lock_machine();
        let next = machine.state.apply(event);
        if next != machine.state {
            debug!(
                from = machine.state.as_str(),
                to = next.as_str(),
                event = ?event,
                "stream state change"
            );
            machine.state = next;
        }
        next
    }

    fn state(&self) -> StreamState {
        self.lock_machine().state
    }

    fn attempts(&self) -> u32 {
        self.lock_machine().policy.attempts()
    }

    fn next_reconnect_delay(&self) -> Option<Duration> {
        self.lock_machine().policy.next_delay()
    }

    fn register_open(&self) {
        self.lock_machine().policy.register_open();
    }

    fn is_close_requested(&self) -> bool {
        self.lock_machine().close_requested
    }

    fn endpoint_string(&self) -> Option<String> {
        self.config.endpoint.clone()
    }

    fn pop_front(&self) -> Option<QueuedRecord> {
        self.lock_outbound().records.pop_front()
    }

    fn push_front(&self, item: QueuedRecord) {
        self.lock_outbound().records.push_front(item);
    }

    #[cfg(test)]
    fn queued_len(&self) -> usize {
        self.lock_outbound().records.len()
    }

    /// Marks the stream permanently down and fails out every queued
    /// record. Sends racing this call either get drained here or fail
    /// fast on the terminal marker; nothing can strand a completion.
    fn close_outbound(&self, reason: FailureReason, detail: &'static str) {
        let drained: Vec<QueuedRecord> = {
            let mut outbound = self.lock_outbound();
            outbound.closed = Some((reason, detail));
            outbound.records.drain(..).collect()
        };
        let endpoint = self.endpoint_string();
        for item in drained {
            self.tracker.record_failure(FailedRecord::new(
                item.record,
                reason,
                detail,
                endpoint.clone(),
            ));
        }
    }
}

/// Cheap-to-clone handle over the lineage's shared stream state.
#[derive(Debug, Clone)]
pub(crate) struct StreamTransport {
    shared: Arc<StreamShared>,
}

impl StreamTransport {
    pub(crate) fn new(config: StreamConfig, tracker: Arc<DeliveryTracker>) -> Self {
        let policy = ReconnectPolicy::new(
            config.reconnect_base_delay,
            config.max_reconnect_attempts,
        );
        Self {
            shared: Arc::new(StreamShared {
                config,
                tracker,
                outbound: Mutex::new(Outbound::default()),
                machine: Mutex::new(Machine {
                    state: StreamState::Disconnected,
                    policy,
                    worker: None,
                    close_requested: false,
                }),
                wake: Notify::new(),
            }),
        }
    }

    /// Queues a record for delivery, waking or starting the connection
    /// task. Returns the completion receiver for flush bookkeeping, or
    /// `None` when the record was rejected synchronously.
    pub(crate) fn send(&self, record: GelfRecord, runtime: &Handle) -> Option<tokio::sync::oneshot::Receiver<()>> {
        let shared = &self.shared;
        if shared.config.endpoint.is_none() {
            shared.tracker.record_failure(FailedRecord::new(
                record,
                FailureReason::NoWsEndpoint,
                "no stream endpoint configured",
                None,
            ));
            return None;
        }

        let receiver = {
            let mut outbound = shared.lock_outbound();
            if let Some((reason, detail)) = outbound.closed {
                drop(outbound);
                shared.tracker.record_failure(FailedRecord::new(
                    record,
                    reason,
                    detail,
                    shared.endpoint_string(),
                ));
                return None;
            }
            let evicted = if outbound.records.len() >= shared.config.max_queued {
                outbound.records.pop_front()
            } else {
                None
            };
            let (completion, receiver) = Completion::new();
            outbound.records.push_back(QueuedRecord { record, completion });
            drop(outbound);
            if let Some(evicted) = evicted {
                shared.tracker.record_failure(FailedRecord::new(
                    evicted.record,
                    FailureReason::Other,
                    "outbound queue full; oldest record dropped",
                    shared.endpoint_string(),
                ));
            }
            receiver
        };

        self.ensure_worker(runtime);
        shared.wake.notify_one();
        Some(receiver)
    }

    fn ensure_worker(&self, runtime: &Handle) {
        let mut machine = self.shared.lock_machine();
        let running = machine
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished());
        if running || machine.close_requested {
            return;
        }
        let shared = Arc::clone(&self.shared);
        machine.worker = Some(runtime.spawn(run_connection(shared)));
    }

    /// Signals the connection task to close the stream and waits for it to
    /// finish. Subsequent sends fail fast.
    pub(crate) async fn close(&self) {
        let worker = {
            let mut machine = self.shared.lock_machine();
            machine.close_requested = true;
            machine.worker.take()
        };
        self.shared.wake.notify_one();
        match worker {
            Some(worker) => {
                let _ = worker.await;
            }
            None => {
                // No task ever ran; mark the stream closed directly.
                self.shared
                    .close_outbound(FailureReason::Other, "stream transport closed");
            }
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        self.shared.state()
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.shared.queued_len()
    }
}

/// How one connected session ended.
enum SessionEnd {
    /// The peer vanished or the socket failed; reconnection may follow.
    Lost,
    /// An orderly close was requested; the task must end.
    Closed,
}

/// Connection task: one per lineage, driving connect, handshake, and
/// drain until closed or out of reconnection budget.
async fn run_connection(shared: Arc<StreamShared>) {
    let Some(endpoint) = shared.config.endpoint.clone() else {
        return;
    };
    loop {
        if shared.is_close_requested() {
            shared.transition(StreamEvent::CloseStarted);
            shared.close_outbound(FailureReason::Other, "stream transport closed");
            shared.transition(StreamEvent::Closed);
            return;
        }

        shared.transition(StreamEvent::ConnectStarted);
        debug!(endpoint = %endpoint, attempt = shared.attempts(), "stream connecting");
        let connect = tokio::time::timeout(
            shared.config.connect_timeout,
            connect_async(endpoint.as_str()),
        );
        match connect.await {
            Ok(Ok((socket, _response))) => {
                shared.register_open();
                match run_session(&shared, socket).await {
                    SessionEnd::Closed => return,
                    SessionEnd::Lost => {}
                }
            }
            Ok(Err(err)) => {
                warn!(error = %err, "stream connect failed");
                shared.transition(StreamEvent::ConnectionLost);
            }
            Err(_) => {
                warn!(
                    timeout = ?shared.config.connect_timeout,
                    "stream connect timed out before the upgrade completed"
                );
                shared.transition(StreamEvent::ConnectionLost);
            }
        }

        if !schedule_reconnect(&shared).await {
            return;
        }
    }
}

/// One connected session: optional handshake, then the drain loop.
async fn run_session(shared: &Arc<StreamShared>, mut socket: WsStream) -> SessionEnd {
    if let Some((access_id, access_secret)) = shared.config.access_pair() {
        shared.transition(StreamEvent::AuthStarted);
        let handshake = AuthRequest {
            frame_type: AUTH_FRAME,
            access_id,
            access_secret,
            log_session_id: &shared.config.session_id,
        };
        match serde_json::to_string(&handshake) {
            Ok(payload) => {
                if socket.send(WsMessage::Text(payload)).await.is_err() {
                    shared.transition(StreamEvent::ConnectionLost);
                    return SessionEnd::Lost;
                }
                if let Some(end) = await_auth_ack(shared, &mut socket).await {
                    return end;
                }
            }
            Err(err) => {
                // Nothing sendable to authenticate with; run the session
                // unauthenticated rather than dropping records.
                warn!(error = %err, "auth handshake could not be serialized");
                shared.transition(StreamEvent::AuthTimedOut);
            }
        }
    } else {
        shared.transition(StreamEvent::Opened);
    }

    session_loop(shared, socket).await
}

/// Waits for the handshake acknowledgement, proceeding optimistically when
/// the timer fires first.
async fn await_auth_ack(shared: &Arc<StreamShared>, socket: &mut WsStream) -> Option<SessionEnd> {
    let deadline = tokio::time::sleep(shared.config.auth_timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!("auth ack timer expired; proceeding optimistically");
                shared.transition(StreamEvent::AuthTimedOut);
                return None;
            }
            frame = socket.next() => match frame {
                Some(Ok(WsMessage::Text(text))) if is_auth_ack(&text) => {
                    debug!("auth acknowledged");
                    shared.transition(StreamEvent::AuthAcknowledged);
                    return None;
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                    shared.transition(StreamEvent::ConnectionLost);
                    return Some(SessionEnd::Lost);
                }
                Some(Ok(_)) => {} // unrelated chatter while authenticating
            }
        }
    }
}

/// Ships queued records and watches the socket until the session ends.
async fn session_loop(shared: &Arc<StreamShared>, mut socket: WsStream) -> SessionEnd {
    loop {
        if shared.is_close_requested() {
            return close_session(shared, socket).await;
        }
        drain_queue(shared, &mut socket).await;
        tokio::select! {
            _ = shared.wake.notified() => {}
            frame = socket.next() => match frame {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                    debug!("stream connection lost");
                    shared.transition(StreamEvent::ConnectionLost);
                    return SessionEnd::Lost;
                }
                Some(Ok(_)) => {} // pings and unsolicited frames
            }
        }
    }
}

/// Sends queued records in FIFO order. A failed write requeues the record
/// at the head and aborts the pass; the connection is treated as still
/// open until the socket itself reports otherwise.
async fn drain_queue(shared: &Arc<StreamShared>, socket: &mut WsStream) {
    loop {
        let Some(QueuedRecord { record, completion }) = shared.pop_front() else {
            return;
        };
        let payload = match serde_json::to_string(&record) {
            Ok(payload) => payload,
            Err(err) => {
                shared.tracker.record_failure(FailedRecord::new(
                    record,
                    FailureReason::Other,
                    format!("record serialization failed: {err}"),
                    shared.endpoint_string(),
                ));
                completion.complete();
                continue;
            }
        };
        match socket.send(WsMessage::Text(payload)).await {
            Ok(()) => {
                shared.tracker.record_sent();
                completion.complete();
            }
            Err(err) => {
                warn!(error = %err, "stream send failed; record requeued");
                shared.tracker.record_failure(FailedRecord::new(
                    record.clone(),
                    FailureReason::WsSendError,
                    err.to_string(),
                    shared.endpoint_string(),
                ));
                shared.push_front(QueuedRecord { record, completion });
                return;
            }
        }
    }
}

/// Orderly teardown: close frame out, stragglers failed, task ends.
async fn close_session(shared: &Arc<StreamShared>, mut socket: WsStream) -> SessionEnd {
    shared.transition(StreamEvent::CloseStarted);
    let _ = socket.send(WsMessage::Close(None)).await;
    shared.close_outbound(FailureReason::Other, "stream transport closed");
    shared.transition(StreamEvent::Closed);
    SessionEnd::Closed
}

/// Sleeps out the backoff before the next attempt. Returns `false` when
/// the budget is exhausted or a close arrived, in which case the queue has
/// been failed out and the task must end.
async fn schedule_reconnect(shared: &Arc<StreamShared>) -> bool {
    let Some(delay) = shared.next_reconnect_delay() else {
        warn!("stream reconnect budget exhausted; failing queued records");
        shared.close_outbound(
            FailureReason::NetworkError,
            "stream reconnect budget exhausted",
        );
        return false;
    };
    debug!(delay_ms = delay.as_millis() as u64, "stream reconnect scheduled");
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            _ = shared.wake.notified() => {
                if shared.is_close_requested() {
                    shared.transition(StreamEvent::CloseStarted);
                    shared.close_outbound(FailureReason::Other, "stream transport closed");
                    shared.transition(StreamEvent::Closed);
                    return false;
                }
                // New records just wait out the pending reconnect.
            }
        }
    }
}
