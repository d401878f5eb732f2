//! Logger construction and record dispatch.
//!
//! This module wires the severity gate, the record builder, the delivery
//! tracker, and the selected transport into one cheap-to-clone handle. A
//! logging call is synchronous and infallible: it gates, builds, hands the
//! record to its transport, and returns; everything that can suspend or
//! fail happens in background tasks and is absorbed into the tracker.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::config::{LoggerConfig, TransportMode};
use crate::config::{AmbientContext, LoggerEnv};
use crate::failure::{DeliveryTracker, FailedRecord, FailureReason, StatsSnapshot};
use crate::http::{HttpTransport, SetupError};
use crate::pending::PendingOps;
use crate::record::{FieldMap, FieldValue, GelfRecord, RecordBuilder};
use crate::severity::Severity;
use crate::stream::{StreamConfig, StreamState, StreamTransport};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The delivery path a lineage was constructed with.
#[derive(Debug, Clone)]
enum Transport {
    Http(Arc<HttpTransport>),
    Stream(StreamTransport),
}

/// State shared by a logger and every child derived from it.
#[derive(Debug)]
struct LoggerShared {
    config: LoggerConfig,
    session_id: String,
    ambient: AmbientContext,
    builder: RecordBuilder,
    tracker: Arc<DeliveryTracker>,
    pending: Arc<PendingOps>,
    transport: Transport,
}

/// A structured-log emitter bound to one delivery endpoint.
///
/// Cloning (or [`Logger::child`]) shares the session, the delivery
/// statistics, and - on the stream path - the live connection and its
/// queue. Logging methods never block, never panic, and never return an
/// error; delivery problems surface through [`Logger::stats`] and
/// [`Logger::failed_records`] instead.
#[derive(Debug, Clone)]
pub struct Logger {
    shared: Arc<LoggerShared>,
}

impl Logger {
    /// Builds a logger from a configuration and an ambient capture.
    ///
    /// The configuration is sanitised first. The session identifier is the
    /// explicit one when set, otherwise a fresh UUID v4. Construction only
    /// fails on unusable setup (a malformed endpoint URL, credentials that
    /// cannot travel in a header); a missing endpoint is not an error, it
    /// surfaces per record as a delivery failure.
    pub fn new(config: LoggerConfig, ambient: AmbientContext) -> Result<Logger, SetupError> {
        let config = config.sanitise();
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let builder = RecordBuilder::new(
            config.host.clone(),
            config.facility.clone(),
            &session_id,
            ambient.fields().clone(),
            config.global_fields.clone(),
        );
        let tracker = Arc::new(DeliveryTracker::new(config.max_failed_records));
        let transport = match config.mode {
            TransportMode::Http => {
                let access = config
                    .access_id
                    .as_deref()
                    .zip(config.access_secret.as_deref());
                Transport::Http(Arc::new(HttpTransport::new(
                    config.endpoint.as_deref(),
                    config.send_timeout,
                    access,
                )?))
            }
            TransportMode::Stream => Transport::Stream(StreamTransport::new(
                StreamConfig {
                    endpoint: config.stream_endpoint.clone(),
                    access_id: config.access_id.clone(),
                    access_secret: config.access_secret.clone(),
                    session_id: session_id.clone(),
                    connect_timeout: config.send_timeout,
                    auth_timeout: config.auth_timeout,
                    reconnect_base_delay: config.reconnect_base_delay,
                    max_reconnect_attempts: config.max_reconnect_attempts,
                    max_queued: config.max_queued_records,
                },
                Arc::clone(&tracker),
            )),
        };
        debug!(
            session = %session_id,
            mode = ?config.mode,
            min_level = %config.min_level,
            "logger constructed"
        );
        Ok(Logger {
            shared: Arc::new(LoggerShared {
                config,
                session_id,
                ambient,
                builder,
                tracker,
                pending: Arc::new(PendingOps::default()),
                transport,
            }),
        })
    }

    /// Builds a logger entirely from the process environment.
    pub fn from_env() -> Result<Logger, SetupError> {
        let env = LoggerEnv::from_os_env();
        let ambient = AmbientContext::from_parts(&env, None);
        Logger::new(LoggerConfig::from_env(&env), ambient)
    }

    /// Derives a child logger whose records carry `extra_fields` on top of
    /// this logger's fields. The child shares the session identifier, the
    /// delivery statistics, the pending set, and - on the stream path -
    /// the live connection and its queue.
    pub fn child(&self, extra_fields: FieldMap) -> Logger {
        let shared = &self.shared;
        let mut config = shared.config.clone();
        config.global_fields.extend(extra_fields);
        let builder = RecordBuilder::new(
            config.host.clone(),
            config.facility.clone(),
            &shared.session_id,
            shared.ambient.fields().clone(),
            config.global_fields.clone(),
        );
        Logger {
            shared: Arc::new(LoggerShared {
                config,
                session_id: shared.session_id.clone(),
                ambient: shared.ambient.clone(),
                builder,
                tracker: Arc::clone(&shared.tracker),
                pending: Arc::clone(&shared.pending),
                transport: shared.transport.clone(),
            }),
        }
    }

    /// Logs at `Emergency` severity.
    pub fn emergency(&self, short_message: impl Into<String>) {
        self.dispatch(Severity::Emergency, short_message.into(), None, FieldMap::new());
    }

    /// Logs at `Alert` severity.
    pub fn alert(&self, short_message: impl Into<String>) {
        self.dispatch(Severity::Alert, short_message.into(), None, FieldMap::new());
    }

    /// Logs at `Critical` severity.
    pub fn critical(&self, short_message: impl Into<String>) {
        self.dispatch(Severity::Critical, short_message.into(), None, FieldMap::new());
    }

    /// Logs at `Error` severity.
    pub fn error(&self, short_message: impl Into<String>) {
        self.dispatch(Severity::Error, short_message.into(), None, FieldMap::new());
    }

    /// Logs at `Warning` severity.
    pub fn warning(&self, short_message: impl Into<String>) {
        self.dispatch(Severity::Warning, short_message.into(), None, FieldMap::new());
    }

    /// Alias for [`Logger::warning`].
    pub fn warn(&self, short_message: impl Into<String>) {
        self.warning(short_message);
    }

    /// Logs at `Notice` severity.
    pub fn notice(&self, short_message: impl Into<String>) {
        self.dispatch(Severity::Notice, short_message.into(), None, FieldMap::new());
    }

    /// Logs at `Informational` severity.
    pub fn info(&self, short_message: impl Into<String>) {
        self.dispatch(
            Severity::Informational,
            short_message.into(),
            None,
            FieldMap::new(),
        );
    }

    /// Alias for [`Logger::info`].
    pub fn log(&self, short_message: impl Into<String>) {
        self.info(short_message);
    }

    /// Logs at `Debug` severity.
    pub fn debug(&self, short_message: impl Into<String>) {
        self.dispatch(Severity::Debug, short_message.into(), None, FieldMap::new());
    }

    /// Long form of [`Logger::emergency`] with an optional detail payload
    /// and per-call fields.
    pub fn emergency_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.dispatch(Severity::Emergency, short_message.into(), full_message, fields);
    }

    /// Long form of [`Logger::alert`].
    pub fn alert_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.dispatch(Severity::Alert, short_message.into(), full_message, fields);
    }

    /// Long form of [`Logger::critical`].
    pub fn critical_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.dispatch(Severity::Critical, short_message.into(), full_message, fields);
    }

    /// Long form of [`Logger::error`].
    pub fn error_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.dispatch(Severity::Error, short_message.into(), full_message, fields);
    }

    /// Long form of [`Logger::warning`].
    pub fn warning_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.dispatch(Severity::Warning, short_message.into(), full_message, fields);
    }

    /// Alias for [`Logger::warning_with`].
    pub fn warn_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.warning_with(short_message, full_message, fields);
    }

    /// Long form of [`Logger::notice`].
    pub fn notice_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.dispatch(Severity::Notice, short_message.into(), full_message, fields);
    }

    /// Long form of [`Logger::info`].
    pub fn info_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.dispatch(
            Severity::Informational,
            short_message.into(),
            full_message,
            fields,
        );
    }

    /// Alias for [`Logger::info_with`].
    pub fn log_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.info_with(short_message, full_message, fields);
    }

    /// Long form of [`Logger::debug`].
    pub fn debug_with(
        &self,
        short_message: impl Into<String>,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        self.dispatch(Severity::Debug, short_message.into(), full_message, fields);
    }

    /// Logs an error value at `Error` severity with its type, message, and
    /// source chain attached as custom fields.
    pub fn exception<E>(&self, error: &E)
    where
        E: std::error::Error + ?Sized,
    {
        let message = error.to_string();
        let chain = error_chain(error);
        let mut fields = FieldMap::new();
        fields.insert(
            "error_type".to_string(),
            FieldValue::Text(std::any::type_name::<E>().to_string()),
        );
        fields.insert("error_message".to_string(), FieldValue::Text(message.clone()));
        fields.insert("error_stack".to_string(), FieldValue::Text(chain.clone()));
        self.dispatch(
            Severity::Error,
            message,
            Some(FieldValue::Text(chain)),
            fields,
        );
    }

    /// Gate, build, mirror, dispatch. The single path every logging call
    /// funnels through.
    fn dispatch(
        &self,
        severity: Severity,
        short_message: String,
        full_message: Option<FieldValue>,
        fields: FieldMap,
    ) {
        let shared = &self.shared;
        if !shared.config.min_level.admits(severity) {
            shared.tracker.record_skipped();
            return;
        }
        let record = shared
            .builder
            .build(severity, short_message, full_message, fields);
        if shared.config.console_mirror {
            mirror(&record);
        }

        // Delivery needs a runtime to suspend in; a call from outside one
        // is absorbed like any other failure rather than panicking.
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                shared.tracker.record_failure(FailedRecord::new(
                    record,
                    FailureReason::Other,
                    "no tokio runtime available for dispatch",
                    None,
                ));
                return;
            }
        };

        match &shared.transport {
            Transport::Http(client) => {
                if client.endpoint().is_none() {
                    shared.tracker.record_failure(FailedRecord::new(
                        record,
                        FailureReason::NoEndpoint,
                        "no collector endpoint configured",
                        None,
                    ));
                    return;
                }
                let client = Arc::clone(client);
                let tracker = Arc::clone(&shared.tracker);
                let task = runtime.spawn(async move {
                    match client.send(&record).await {
                        Ok(()) => tracker.record_sent(),
                        Err(err) => {
                            let reason = err.reason();
                            tracker.record_failure(FailedRecord::new(
                                record,
                                reason,
                                err.to_string(),
                                client.endpoint_string(),
                            ));
                        }
                    }
                });
                shared.pending.track_task(task);
            }
            Transport::Stream(stream) => {
                if let Some(receiver) = stream.send(record, &runtime) {
                    shared.pending.track_signal(receiver);
                }
            }
        }
    }

    /// Point-in-time delivery counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.tracker.stats()
    }

    /// Retained failures, most recent first, optionally limited.
    pub fn failed_records(&self, limit: Option<usize>) -> Vec<FailedRecord> {
        self.shared.tracker.failed_records(limit)
    }

    /// Failure counts in the retained history, bucketed by reason.
    pub fn failure_summary(&self) -> BTreeMap<FailureReason, u64> {
        self.shared.tracker.failure_summary()
    }

    /// Empties the failure history; counters are untouched.
    pub fn clear_failed_records(&self) {
        self.shared.tracker.clear_failed_records();
    }

    /// Zeroes every counter and empties the failure history.
    pub fn reset_stats(&self) {
        self.shared.tracker.reset();
    }

    /// The session identifier shared by this lineage.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// The stream connection lifecycle, when this lineage uses the stream
    /// path.
    pub fn stream_state(&self) -> Option<StreamState> {
        match &self.shared.transport {
            Transport::Stream(stream) => Some(stream.state()),
            Transport::Http(_) => None,
        }
    }

    /// Awaits every delivery dispatched before this call. Failed
    /// deliveries resolve the wait like successful ones; this never
    /// returns an error.
    pub async fn flush(&self) {
        self.shared.pending.flush().await;
    }

    /// Flushes, then closes the stream connection (a no-op on the HTTP
    /// path). The logger remains usable for introspection afterwards;
    /// further sends on a closed stream fail fast.
    pub async fn shutdown(&self) {
        self.flush().await;
        if let Transport::Stream(stream) = &self.shared.transport {
            stream.close().await;
            info!(
                session = %self.shared.session_id,
                stats = ?self.stats(),
                "stream logger shut down"
            );
        }
    }
}

/// Mirrors a record to local `tracing` output at the closest level.
fn mirror(record: &GelfRecord) {
    match record.level {
        0..=3 => error!(
            target: "gelf.mirror",
            level = record.level,
            facility = %record.facility,
            "{}",
            record.short_message
        ),
        4 => warn!(
            target: "gelf.mirror",
            level = record.level,
            facility = %record.facility,
            "{}",
            record.short_message
        ),
        5 | 6 => info!(
            target: "gelf.mirror",
            level = record.level,
            facility = %record.facility,
            "{}",
            record.short_message
        ),
        _ => debug!(
            target: "gelf.mirror",
            level = record.level,
            facility = %record.facility,
            "{}",
            record.short_message
        ),
    }
}

/// Renders an error and its source chain, one cause per line.
fn error_chain<E>(error: &E) -> String
where
    E: std::error::Error + ?Sized,
{
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str("\ncaused by: ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}
