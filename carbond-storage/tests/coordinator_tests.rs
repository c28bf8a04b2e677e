//! # Concurrency Coordinator Tests
//!
//! Pause/resume handshakes, configuration swaps and shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use carbond_core::{
    AggregationMethod, AggregationRule, DaemonConfig, Metrics, Pattern, RetentionRule, Retention,
    RuleSet, RuntimeConfig,
};
use carbond_storage::{
    metric_path, Coordinator, MetricDatabase, Pace, Worker, WorkerState, Writer,
};

/// Counts iterations, records snapshot versions, flags work in progress
struct ProbeWorker {
    name: String,
    iterations: Arc<AtomicU64>,
    busy: Arc<AtomicBool>,
    versions: Arc<Mutex<Vec<u64>>>,
    pace: Pace,
}

impl ProbeWorker {
    fn new(name: &str, pace: Pace) -> Self {
        Self {
            name: name.to_string(),
            iterations: Arc::new(AtomicU64::new(0)),
            busy: Arc::new(AtomicBool::new(false)),
            versions: Arc::new(Mutex::new(Vec::new())),
            pace,
        }
    }
}

impl Worker for ProbeWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_once(&mut self, config: &Arc<RuntimeConfig>) -> Pace {
        self.busy.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        self.versions.lock().push(config.version);
        self.iterations.fetch_add(1, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
        self.pace
    }
}

fn snapshot() -> Arc<RuntimeConfig> {
    Arc::new(RuntimeConfig::new(DaemonConfig::default(), RuleSet::default()))
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_pause_reaches_quiescence() {
    let coordinator = Coordinator::new(snapshot());
    let mut probes = Vec::new();
    for i in 0..3 {
        let worker = ProbeWorker::new(&format!("probe-{}", i), Pace::Continue);
        probes.push((worker.iterations.clone(), worker.busy.clone()));
        coordinator.spawn(worker).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || probes
        .iter()
        .all(|(n, _)| n.load(Ordering::SeqCst) > 0)));

    let guard = coordinator.pause_all();
    assert!(guard
        .worker_states()
        .iter()
        .all(|(_, state)| *state == WorkerState::Paused));
    assert!(probes.iter().all(|(_, busy)| !busy.load(Ordering::SeqCst)));

    let frozen: Vec<u64> = probes.iter().map(|(n, _)| n.load(Ordering::SeqCst)).collect();
    thread::sleep(Duration::from_millis(50));
    let after: Vec<u64> = probes.iter().map(|(n, _)| n.load(Ordering::SeqCst)).collect();
    assert_eq!(frozen, after);

    guard.resume_all();
    assert!(wait_until(Duration::from_secs(5), || probes
        .iter()
        .zip(&frozen)
        .all(|((n, _), before)| n.load(Ordering::SeqCst) > *before)));

    coordinator.shutdown();
}

#[test]
fn test_pause_interrupts_idle_worker() {
    let coordinator = Coordinator::new(snapshot());
    let worker = ProbeWorker::new("sleeper", Pace::Idle(Duration::from_secs(60)));
    let iterations = worker.iterations.clone();
    coordinator.spawn(worker).unwrap();
    assert!(wait_until(Duration::from_secs(5), || iterations.load(Ordering::SeqCst) == 1));

    let started = Instant::now();
    let guard = coordinator.pause_all();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(guard.worker_states()[0].1, WorkerState::Paused);
    drop(guard);

    coordinator.shutdown();
}

#[test]
fn test_reconfigure_swaps_between_iterations() {
    let first = snapshot();
    let coordinator = Coordinator::new(first.clone());
    let worker = ProbeWorker::new("probe", Pace::Continue);
    let versions = worker.versions.clone();
    coordinator.spawn(worker).unwrap();
    assert!(wait_until(Duration::from_secs(5), || !versions.lock().is_empty()));

    let second = snapshot();
    coordinator.reconfigure(second.clone());
    assert_eq!(coordinator.current().version, second.version);

    assert!(wait_until(Duration::from_secs(5), || versions
        .lock()
        .last()
        .map_or(false, |v| *v == second.version)));
    coordinator.shutdown();

    // Never back to the old snapshot once the new one was seen
    let versions = versions.lock();
    let switch = versions.iter().position(|v| *v == second.version).unwrap();
    assert!(versions[..switch].iter().all(|v| *v == first.version));
    assert!(versions[switch..].iter().all(|v| *v == second.version));
}

#[test]
fn test_shutdown_joins_all_workers() {
    let coordinator = Coordinator::new(snapshot());
    coordinator
        .spawn(ProbeWorker::new("busy", Pace::Continue))
        .unwrap();
    coordinator
        .spawn(ProbeWorker::new("idle", Pace::Idle(Duration::from_secs(60))))
        .unwrap();
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    coordinator.shutdown();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!coordinator.is_running());
    assert!(coordinator
        .worker_states()
        .iter()
        .all(|(_, state)| *state == WorkerState::Stopped));

    assert!(coordinator
        .spawn(ProbeWorker::new("late", Pace::Continue))
        .is_err());
}

#[test]
fn test_pause_skips_stopped_worker() {
    struct OneShot;
    impl Worker for OneShot {
        fn name(&self) -> &str {
            "one-shot"
        }
        fn run_once(&mut self, _config: &Arc<RuntimeConfig>) -> Pace {
            panic!("worker failure");
        }
    }

    let coordinator = Coordinator::new(snapshot());
    coordinator.spawn(OneShot).unwrap();
    assert!(wait_until(Duration::from_secs(5), || coordinator.worker_states()[0].1
        == WorkerState::Stopped));

    // Must not wait forever on a worker that is gone
    coordinator.reconfigure(snapshot());
    coordinator.shutdown();
}

#[test]
fn test_writer_follows_reconfigured_storage() {
    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();
    let rules = RuleSet::new(
        vec![RetentionRule::new("all", Pattern::new(".*"), vec![Retention::new(60, 600).unwrap()])
            .unwrap()],
        vec![AggregationRule::new("all", Pattern::new(".*"), 0.5, AggregationMethod::Sum).unwrap()],
    );
    let config_for = |dir: &TempDir| {
        Arc::new(RuntimeConfig::new(
            DaemonConfig {
                storage_dir: dir.path().to_path_buf(),
                ..DaemonConfig::default()
            },
            rules.clone(),
        ))
    };

    let db = Arc::new(MetricDatabase::new(Metrics::new()));
    let coordinator = Coordinator::new(config_for(&first_dir));
    coordinator.spawn(Writer::new(db.clone())).unwrap();

    db.append("web.cpu", 1_700_000_040, 1.0).unwrap();
    assert!(wait_until(Duration::from_secs(10), || db.pending_total() == 0));
    assert!(metric_path(first_dir.path(), "web.cpu").exists());

    coordinator.reconfigure(config_for(&second_dir));
    db.append("web.mem", 1_700_000_040, 1.0).unwrap();
    assert!(wait_until(Duration::from_secs(10), || db.pending_total() == 0));
    assert!(metric_path(second_dir.path(), "web.mem").exists());
    assert!(!metric_path(first_dir.path(), "web.mem").exists());

    coordinator.shutdown();
}
