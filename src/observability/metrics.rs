//! Broker counters
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Relaxed atomics; exactness across counters is not required

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by every broker component
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    producers_accepted: AtomicU64,
    bad_requests: AtomicU64,
    ingest_failures: AtomicU64,
    records_merged: AtomicU64,
    bytes_merged: AtomicU64,
    merge_failures: AtomicU64,
    subscribers_registered: AtomicU64,
    subscribers_evicted: AtomicU64,
    subscribers_closed: AtomicU64,
    recovery_restaged: AtomicU64,
}

impl BrokerMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_producers_accepted(&self) {
        self.producers_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bad_requests(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ingest_failures(&self) {
        self.ingest_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one merged record of `bytes` payload bytes
    pub fn record_merged(&self, bytes: u64) {
        self.records_merged.fetch_add(1, Ordering::Relaxed);
        self.bytes_merged.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_merge_failures(&self) {
        self.merge_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_subscribers_registered(&self) {
        self.subscribers_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_subscribers_evicted(&self) {
        self.subscribers_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_subscribers_closed(&self) {
        self.subscribers_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_recovery_restaged(&self, count: u64) {
        self.recovery_restaged.fetch_add(count, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            producers_accepted: self.producers_accepted.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            ingest_failures: self.ingest_failures.load(Ordering::Relaxed),
            records_merged: self.records_merged.load(Ordering::Relaxed),
            bytes_merged: self.bytes_merged.load(Ordering::Relaxed),
            merge_failures: self.merge_failures.load(Ordering::Relaxed),
            subscribers_registered: self.subscribers_registered.load(Ordering::Relaxed),
            subscribers_evicted: self.subscribers_evicted.load(Ordering::Relaxed),
            subscribers_closed: self.subscribers_closed.load(Ordering::Relaxed),
            recovery_restaged: self.recovery_restaged.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub producers_accepted: u64,
    pub bad_requests: u64,
    pub ingest_failures: u64,
    pub records_merged: u64,
    pub bytes_merged: u64,
    pub merge_failures: u64,
    pub subscribers_registered: u64,
    pub subscribers_evicted: u64,
    pub subscribers_closed: u64,
    pub recovery_restaged: u64,
}
