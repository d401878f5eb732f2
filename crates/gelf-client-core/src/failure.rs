//! Delivery bookkeeping: counters and a bounded history of failed records.
//!
//! Every logger lineage owns one [`DeliveryTracker`]. Transports report
//! outcomes into it and the introspection surface reads from it. All
//! operations absorb contention and poisoning; nothing in here can take the
//! host process down.

use crate::record::{now_unix_seconds, GelfRecord};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Why a record never reached the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No HTTP endpoint configured; detected before any I/O.
    NoEndpoint,
    /// The collector answered with a non-success status.
    HttpError,
    /// The request was cancelled by its own timer.
    Timeout,
    /// Transport-level failure with no response at all.
    NetworkError,
    /// A stream write failed.
    WsSendError,
    /// No stream endpoint configured; detected before any I/O.
    NoWsEndpoint,
    /// Anything the other buckets do not cover.
    Other,
}

impl FailureReason {
    /// Returns the snake_case tag used on the introspection surface.
    pub const fn as_str(self) -> &'static str {
        match self {
            FailureReason::NoEndpoint => "no_endpoint",
            FailureReason::HttpError => "http_error",
            FailureReason::Timeout => "timeout",
            FailureReason::NetworkError => "network_error",
            FailureReason::WsSendError => "ws_send_error",
            FailureReason::NoWsEndpoint => "no_ws_endpoint",
            FailureReason::Other => "other",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record the engine could not deliver, retained for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    pub record: GelfRecord,
    pub reason: FailureReason,
    /// Human-readable cause, suitable for operator triage.
    pub error: String,
    /// The endpoint involved, when one was resolved before the failure.
    pub endpoint: Option<String>,
    /// Capture time as fractional unix seconds.
    pub failed_at: f64,
}

impl FailedRecord {
    /// Captures a failure at the current wall-clock time.
    pub fn new(
        record: GelfRecord,
        reason: FailureReason,
        error: impl Into<String>,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            record,
            reason,
            error: error.into(),
            endpoint,
            failed_at: now_unix_seconds(),
        }
    }
}

/// Point-in-time view of the delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Confirmed deliveries.
    pub sent: u64,
    /// Recorded failures (a record can fail more than once before it is
    /// finally delivered or dropped).
    pub failed: u64,
    /// Records suppressed by the severity gate.
    pub skipped: u64,
    /// Failures currently retained in the history ring.
    pub failed_records: usize,
}

/// Tracks delivery outcomes for one logger lineage.
///
/// Counters only ever grow (until [`DeliveryTracker::reset`]); the failure
/// history is a ring that evicts its oldest entry once `capacity` is
/// reached.
#[derive(Debug)]
pub struct DeliveryTracker {
    sent: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    capacity: usize,
    history: Mutex<VecDeque<FailedRecord>>,
}

impl DeliveryTracker {
    /// Creates a tracker retaining at most `capacity` failed records.
    pub fn new(capacity: usize) -> Self {
        Self {
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            capacity,
            history: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        }
    }

    /// Counts a confirmed delivery.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a record suppressed by the severity gate.
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a failure and retains it in the history ring, evicting the
    /// oldest entry when full.
    pub fn record_failure(&self, failure: FailedRecord) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            return;
        }
        let mut history = self.lock_history();
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(failure);
    }

    /// Returns the current counter values.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed_records: self.lock_history().len(),
        }
    }

    /// Returns retained failures, most recent first, up to `limit` when
    /// one is given.
    pub fn failed_records(&self, limit: Option<usize>) -> Vec<FailedRecord> {
        let history = self.lock_history();
        let take = limit.unwrap_or(history.len());
        history.iter().rev().take(take).cloned().collect()
    }

    /// Returns per-reason counts over the retained history (not lifetime
    /// totals; evicted failures no longer contribute).
    pub fn failure_summary(&self) -> BTreeMap<FailureReason, u64> {
        let history = self.lock_history();
        let mut summary = BTreeMap::new();
        for failure in history.iter() {
            *summary.entry(failure.reason).or_insert(0) += 1;
        }
        summary
    }

    /// Drops the retained history; counters are unaffected.
    pub fn clear_failed_records(&self) {
        self.lock_history().clear();
    }

    /// Zeroes every counter and drops the retained history.
    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.clear_failed_records();
    }

    /// Recovers the history lock even when a panicking thread poisoned it.
    fn lock_history(&self) -> MutexGuard<'_, VecDeque<FailedRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
