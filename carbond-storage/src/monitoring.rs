//! Self-observation loop: once per second, feeds the number of slots written
//! during the last second back into the database as `carbond.points`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use carbond_core::{RuntimeConfig, Timestamp};

use crate::coordinator::{Pace, Worker};
use crate::database::MetricDatabase;

pub const POINTS_METRIC: &str = "carbond.points";

pub struct MonitoringWorker {
    db: Arc<MetricDatabase>,
    last_tick: Timestamp,
}

impl MonitoringWorker {
    pub fn new(db: Arc<MetricDatabase>) -> Self {
        Self { db, last_tick: 0 }
    }

    /// Record one sample for `now`. Returns false if `now` was already recorded.
    pub fn tick(&mut self, now: Timestamp) -> bool {
        if now <= self.last_tick {
            return false;
        }
        self.last_tick = now;

        let written = self.db.stats().take_points_written();
        if let Err(e) = self.db.append(POINTS_METRIC, now, written as f64) {
            warn!("failed to record {}: {}", POINTS_METRIC, e);
        }
        true
    }
}

impl Worker for MonitoringWorker {
    fn name(&self) -> &str {
        "carbond-monitoring"
    }

    fn run_once(&mut self, _config: &Arc<RuntimeConfig>) -> Pace {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.tick(now.as_secs() as Timestamp);

        // Sleep to the next second boundary
        let into_second = Duration::from_nanos(now.subsec_nanos() as u64);
        Pace::Idle(Duration::from_secs(1).saturating_sub(into_second))
    }
}
