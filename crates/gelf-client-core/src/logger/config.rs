//! Static configuration for a logger lineage.
//!
//! These settings describe where records go and how the transports behave.
//! A configuration is resolved once at construction; children inherit the
//! parent's resolved values with only their extra fields layered on top.

use std::time::Duration;

use crate::config::LoggerEnv;
use crate::record::FieldMap;
use crate::severity::Severity;
use tracing::warn;

/// Default `host` stamped on records when none is supplied.
pub const DEFAULT_HOST: &str = "localhost";
/// Default `facility` stamped on records when none is supplied.
pub const DEFAULT_FACILITY: &str = "app";
/// Default per-request timeout for the one-shot HTTP transport.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default wait for the stream auth acknowledgement before proceeding
/// optimistically.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default capacity of the failure history ring.
pub const DEFAULT_MAX_FAILED_RECORDS: usize = 50;
/// Default capacity of the stream's outbound queue.
pub const DEFAULT_MAX_QUEUED_RECORDS: usize = 1000;
/// Default base delay of the reconnect backoff schedule.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default reconnect budget between successful opens.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Which delivery path a lineage uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// One-shot HTTP `POST` per record.
    #[default]
    Http,
    /// One persistent websocket shared by the lineage.
    Stream,
}

/// Configuration values that control a logger lineage.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Delivery path records take.
    pub mode: TransportMode,
    /// One-shot HTTP ingestion endpoint.
    pub endpoint: Option<String>,
    /// Persistent stream endpoint.
    pub stream_endpoint: Option<String>,
    /// `host` stamped on every record.
    pub host: String,
    /// `facility` stamped on every record.
    pub facility: String,
    /// Minimum severity that is emitted; everything quieter is skipped.
    pub min_level: Severity,
    /// Per-logger custom fields, layered over the ambient context.
    pub global_fields: FieldMap,
    /// Whether emitted records are mirrored to local `tracing` output.
    pub console_mirror: bool,
    /// Per-request timeout for one-shot HTTP deliveries; also bounds
    /// stream connection establishment, upgrade included.
    pub send_timeout: Duration,
    /// Wait for the stream auth acknowledgement before proceeding.
    pub auth_timeout: Duration,
    /// Capacity of the failure history ring. Zero keeps counters only.
    pub max_failed_records: usize,
    /// Capacity of the stream's outbound queue.
    pub max_queued_records: usize,
    /// Base delay of the reconnect backoff schedule.
    pub reconnect_base_delay: Duration,
    /// Reconnect budget between successful opens. Zero disables
    /// reconnection entirely.
    pub max_reconnect_attempts: u32,
    /// Access key id sent to authenticated endpoints.
    pub access_id: Option<String>,
    /// Access key secret sent to authenticated endpoints.
    pub access_secret: Option<String>,
    /// Explicit session identifier; a fresh UUID is generated when absent.
    pub session_id: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            endpoint: None,
            stream_endpoint: None,
            host: DEFAULT_HOST.to_string(),
            facility: DEFAULT_FACILITY.to_string(),
            min_level: Severity::Informational,
            global_fields: FieldMap::new(),
            console_mirror: false,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            max_failed_records: DEFAULT_MAX_FAILED_RECORDS,
            max_queued_records: DEFAULT_MAX_QUEUED_RECORDS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            access_id: None,
            access_secret: None,
            session_id: None,
        }
    }
}

impl LoggerConfig {
    /// Projects an environment capture into a configuration. The stream
    /// endpoint wins when both delivery paths are configured.
    pub fn from_env(env: &LoggerEnv) -> Self {
        let defaults = Self::default();
        Self {
            mode: if env.stream_endpoint.is_some() {
                TransportMode::Stream
            } else {
                TransportMode::Http
            },
            endpoint: env.http_endpoint.clone(),
            stream_endpoint: env.stream_endpoint.clone(),
            host: env.host.clone().unwrap_or(defaults.host),
            facility: env.facility.clone().unwrap_or(defaults.facility),
            min_level: env.min_level.unwrap_or(defaults.min_level),
            console_mirror: env.console_mirror,
            access_id: env.access_id.clone(),
            access_secret: env.access_secret.clone(),
            session_id: env.session_id.clone(),
            ..defaults
        }
    }

    /// Applies safety limits to runtime settings.
    ///
    /// Degenerate values (zero timeouts, an unbuffered queue, a zero
    /// backoff base) would make delivery spin or fail instantly; they are
    /// clamped back to the defaults with a warning. A zero failure-ring
    /// capacity and a zero reconnect budget are deliberate choices and
    /// pass through untouched.
    pub(crate) fn sanitise(mut self) -> Self {
        if self.send_timeout.is_zero() {
            warn!(
                "send timeout must be > 0; defaulting to {:?}",
                DEFAULT_SEND_TIMEOUT
            );
            self.send_timeout = DEFAULT_SEND_TIMEOUT;
        }
        if self.auth_timeout.is_zero() {
            warn!(
                "auth timeout must be > 0; defaulting to {:?}",
                DEFAULT_AUTH_TIMEOUT
            );
            self.auth_timeout = DEFAULT_AUTH_TIMEOUT;
        }
        if self.max_queued_records == 0 {
            warn!(
                "queued-record capacity must be > 0; defaulting to {}",
                DEFAULT_MAX_QUEUED_RECORDS
            );
            self.max_queued_records = DEFAULT_MAX_QUEUED_RECORDS;
        }
        if self.reconnect_base_delay.is_zero() {
            warn!(
                "reconnect base delay must be > 0; defaulting to {:?}",
                DEFAULT_RECONNECT_BASE_DELAY
            );
            self.reconnect_base_delay = DEFAULT_RECONNECT_BASE_DELAY;
        }
        self
    }
}
