//! # Self-observation
//!
//! Counters the daemon keeps about itself. `points_written` doubles as the
//! source of the synthetic `carbond.points` metric.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Ingest
    points_received: AtomicU64,
    malformed_lines: AtomicU64,

    // Persistence
    points_written: AtomicU64,
    points_written_total: AtomicU64,
    points_dropped: AtomicU64,
    write_errors: AtomicU64,
    flushes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, count: u64) {
        self.inner.points_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_malformed_line(&self) {
        self.inner.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    /// Record slot writes, including propagated ones
    pub fn record_written(&self, count: u64) {
        self.inner.points_written.fetch_add(count, Ordering::Relaxed);
        self.inner.points_written_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.inner.points_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_write_error(&self) {
        self.inner.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Slot writes since the previous call, resetting the counter
    pub fn take_points_written(&self) -> u64 {
        self.inner.points_written.swap(0, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            points_received: self.inner.points_received.load(Ordering::Relaxed),
            malformed_lines: self.inner.malformed_lines.load(Ordering::Relaxed),
            points_written: self.inner.points_written_total.load(Ordering::Relaxed),
            points_dropped: self.inner.points_dropped.load(Ordering::Relaxed),
            write_errors: self.inner.write_errors.load(Ordering::Relaxed),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub points_received: u64,
    pub malformed_lines: u64,
    pub points_written: u64,
    pub points_dropped: u64,
    pub write_errors: u64,
    pub flushes: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) {
        tracing::debug!(
            name = self.name,
            duration_us = self.elapsed().as_micros() as u64,
            "operation completed"
        );
    }
}
