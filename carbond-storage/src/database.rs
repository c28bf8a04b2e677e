//! # Metric Database
//!
//! In-memory registry of every metric seen since startup. Each metric owns an
//! append-ordered buffer of points not yet persisted, guarded by its own lock.
//!
//! ```text
//! append("a.b", t, v) ──> get-or-create ──> lock(a.b) ──> push tail
//!                                                  ▲
//! writer ──> largest_backlog() ────────────────────┘ lock(a.b) ──> flush ──> clear
//! ```
//!
//! Lookup is a linear scan over the registry. Metrics are never removed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use carbond_core::{error::Result, metrics::Metrics, validate_metric_name, MetricPoint, Timestamp};

/// A named metric and its unflushed points
#[derive(Debug)]
pub struct Metric {
    name: String,
    buffer: Mutex<Vec<MetricPoint>>,
    pending: AtomicUsize,
}

impl Metric {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            buffer: Mutex::new(Vec::new()),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffered point count. Read without the buffer lock.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn push(&self, point: MetricPoint) {
        let mut buffer = self.buffer.lock();
        buffer.push(point);
        self.pending.store(buffer.len(), Ordering::Release);
    }

    /// Lock the buffer for a flush. Appends wait until the guard is dropped.
    pub fn lock(&self) -> MetricBuffer<'_> {
        MetricBuffer {
            metric: self,
            buffer: self.buffer.lock(),
        }
    }
}

/// Exclusive access to a metric's buffer
pub struct MetricBuffer<'a> {
    metric: &'a Metric,
    buffer: MutexGuard<'a, Vec<MetricPoint>>,
}

impl MetricBuffer<'_> {
    /// Points in arrival order
    pub fn points(&self) -> &[MetricPoint] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.metric.pending.store(0, Ordering::Release);
    }
}

pub struct MetricDatabase {
    metrics: RwLock<Vec<Arc<Metric>>>,
    stats: Metrics,
}

impl MetricDatabase {
    pub fn new(stats: Metrics) -> Self {
        Self {
            metrics: RwLock::new(Vec::new()),
            stats,
        }
    }

    /// Buffer one point, registering the metric on first sight
    pub fn append(&self, name: &str, timestamp: Timestamp, value: f64) -> Result<()> {
        validate_metric_name(name)?;
        let metric = self.get_or_create(name);
        metric.push(MetricPoint::new(timestamp, value));
        self.stats.record_received(1);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Metric>> {
        self.metrics.read().iter().find(|m| m.name == name).cloned()
    }

    fn get_or_create(&self, name: &str) -> Arc<Metric> {
        if let Some(metric) = self.get(name) {
            return metric;
        }

        let mut metrics = self.metrics.write();
        // Another appender may have registered it between the two locks
        if let Some(metric) = metrics.iter().find(|m| m.name == name) {
            return metric.clone();
        }
        let metric = Arc::new(Metric::new(name));
        metrics.push(metric.clone());
        debug!(metric = name, total = metrics.len(), "registered metric");
        metric
    }

    /// The metric with the most buffered points; the first one wins a tie
    pub fn largest_backlog(&self) -> Option<Arc<Metric>> {
        let metrics = self.metrics.read();
        let mut best: Option<&Arc<Metric>> = None;
        let mut best_pending = 0;
        for metric in metrics.iter() {
            let pending = metric.pending();
            if pending > best_pending {
                best = Some(metric);
                best_pending = pending;
            }
        }
        best.cloned()
    }

    pub fn pending_total(&self) -> usize {
        self.metrics.read().iter().map(|m| m.pending()).sum()
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.read().iter().map(|m| m.name.clone()).collect()
    }

    pub fn stats(&self) -> &Metrics {
        &self.stats
    }
}
