//! # Writer Scheduler
//!
//! Drains the Metric Database into Whisper files, largest backlog first.
//! Each cycle flushes exactly one metric; with nothing pending the writer
//! idles for [`IDLE_INTERVAL`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use carbond_core::{metrics::Timer, Metrics, RuntimeConfig};

use crate::coordinator::{Pace, Worker};
use crate::database::{Metric, MetricDatabase};
use crate::whisper;

pub const IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of flushing one metric's buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Buffered points taken from the metric
    pub points: usize,
    /// Slots written, propagated ones included
    pub slots_written: usize,
    /// Points with no matching rule
    pub unresolved: usize,
    /// Points lost to I/O or format errors
    pub failed: usize,
}

/// Persist every buffered point of `metric` in arrival order, then clear the buffer.
///
/// The metric stays locked for the whole flush. Failed points are not retried.
pub fn flush_metric(metric: &Metric, config: &RuntimeConfig, stats: &Metrics) -> FlushReport {
    let timer = Timer::new("flush");
    let mut buffer = metric.lock();
    let mut report = FlushReport {
        points: buffer.points().len(),
        ..FlushReport::default()
    };
    let mut first_error = None;

    for point in buffer.points() {
        match whisper::write_value(
            &config.daemon.storage_dir,
            &config.rules,
            metric.name(),
            point.timestamp,
            point.value,
        ) {
            Ok(slots) => report.slots_written += slots,
            Err(e) if e.is_resolution_miss() => {
                debug!(metric = metric.name(), timestamp = point.timestamp, "{}", e);
                report.unresolved += 1;
            }
            Err(e) => {
                stats.record_write_error();
                report.failed += 1;
                first_error.get_or_insert(e);
            }
        }
    }
    buffer.clear();
    drop(buffer);

    stats.record_flush();
    stats.record_written(report.slots_written as u64);
    stats.record_dropped((report.unresolved + report.failed) as u64);

    if report.unresolved > 0 {
        warn!(
            metric = metric.name(),
            points = report.unresolved,
            "no matching rule, points not persisted"
        );
    }
    if let Some(e) = first_error {
        error!(
            metric = metric.name(),
            failed = report.failed,
            code = e.error_code(),
            "write failed: {}",
            e
        );
    }

    debug!(
        metric = metric.name(),
        points = report.points,
        slots = report.slots_written,
        "flushed"
    );
    timer.stop();
    report
}

pub struct Writer {
    db: Arc<MetricDatabase>,
}

impl Writer {
    pub fn new(db: Arc<MetricDatabase>) -> Self {
        Self { db }
    }

    /// Flush the most backlogged metric, if any
    pub fn flush_largest(&self, config: &RuntimeConfig) -> Option<(String, FlushReport)> {
        let metric = self.db.largest_backlog()?;
        let report = flush_metric(&metric, config, self.db.stats());
        Some((metric.name().to_string(), report))
    }

    /// Flush until nothing is pending. Used for the final drain at shutdown.
    pub fn drain(&self, config: &RuntimeConfig) -> usize {
        let mut flushed = 0;
        while self.flush_largest(config).is_some() {
            flushed += 1;
        }
        flushed
    }
}

impl Worker for Writer {
    fn name(&self) -> &str {
        "carbond-writer"
    }

    fn run_once(&mut self, config: &Arc<RuntimeConfig>) -> Pace {
        match self.flush_largest(config) {
            Some(_) => Pace::Continue,
            None => Pace::Idle(IDLE_INTERVAL),
        }
    }
}
