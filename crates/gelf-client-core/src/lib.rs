//! Client-side delivery of GELF structured log records.
//!
//! The crate re-exports the building blocks required to capture
//! configuration from the environment, emit records through the one-shot
//! HTTP or persistent stream transport, and inspect delivery outcomes in
//! host applications without digging into the internal module layout.

pub mod config;
pub mod failure;
pub mod http;
pub mod logger;
mod pending;
pub mod record;
pub mod severity;
pub mod stream;

pub use config::{AmbientContext, GeoContext, LoggerEnv, RequestDescriptor};
pub use failure::{FailedRecord, FailureReason, StatsSnapshot};
pub use http::SetupError;
pub use logger::{Logger, LoggerConfig, TransportMode};
pub use record::{FieldMap, FieldValue, GelfRecord, RecordBuilder};
pub use severity::Severity;
pub use stream::{StreamState, MAX_RECONNECT_DELAY};
