//! Logger module facade.
//!
//! This module re-exports the high-level logger API while wiring the
//! specialised submodules that implement configuration, task-scoped
//! binding, and record dispatch.

pub(crate) mod config;
mod context;
mod core;
#[cfg(test)]
pub(crate) mod test_support;

pub use config::{
    LoggerConfig, TransportMode, DEFAULT_AUTH_TIMEOUT, DEFAULT_FACILITY, DEFAULT_HOST,
    DEFAULT_MAX_FAILED_RECORDS, DEFAULT_MAX_QUEUED_RECORDS, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_SEND_TIMEOUT,
};
pub use core::Logger;
