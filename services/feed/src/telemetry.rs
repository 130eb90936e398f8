//! Per-source atomic counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Restart and recovery metrics nested inside [`FeedTelemetry`].
#[derive(Debug, Default)]
pub struct FeedStamina {
    /// Completed run/restart cycles
    pub successful_restarts: AtomicU64,
    /// Stall detections reported by watchdogs
    pub stalls_detected: AtomicU64,
    /// Worker threads that died abnormally
    pub thread_failures: AtomicU64,
    /// Duration of the last completed run, milliseconds
    pub recovery_latency_ms: AtomicU64,
    /// Lines per second over the last completed run
    pub live_processing_rate: AtomicU64,
}

/// Per-source counters shared lock-free between producer and readers.
///
/// All increments are relaxed: these are counters, not synchronization.
#[derive(Debug, Default)]
pub struct FeedTelemetry {
    /// Orders successfully parsed and enqueued
    pub orders_received: AtomicU64,
    /// Payloads rejected by validation or parsing
    pub anomalies: AtomicU64,
    /// Events lost to a full queue
    pub dropped_packets: AtomicU64,
    /// Restart and recovery metrics
    pub stamina: FeedStamina,
}

impl FeedTelemetry {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one completed run.
    pub fn record_run(&self, lines: u64, elapsed_ms: u64) {
        self.stamina.successful_restarts.fetch_add(1, Ordering::Relaxed);
        self.stamina
            .recovery_latency_ms
            .store(elapsed_ms, Ordering::Relaxed);
        let rate = if elapsed_ms > 0 {
            lines * 1000 / elapsed_ms
        } else {
            0
        };
        self.stamina.live_processing_rate.store(rate, Ordering::Relaxed);
    }

    /// Count one rejected payload.
    pub fn count_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }
}
