//! # Writer Scheduler Tests
//!
//! Largest-backlog-first draining, arrival order and failure accounting.

use std::sync::Arc;

use tempfile::TempDir;

use carbond_core::{
    AggregationMethod, AggregationRule, DaemonConfig, Metrics, Pattern, RetentionRule, Retention,
    RuleSet, RuntimeConfig,
};
use carbond_storage::{metric_path, MetricDatabase, WhisperFile, Writer};

const T: u32 = 1_700_000_040;

fn runtime_config(storage_dir: &std::path::Path) -> RuntimeConfig {
    let rules = RuleSet::new(
        vec![RetentionRule::new(
            "servers",
            Pattern::new(r"^servers\."),
            vec![Retention::new(60, 3600).unwrap()],
        )
        .unwrap()],
        vec![AggregationRule::new("all", Pattern::new(".*"), 0.5, AggregationMethod::Average)
            .unwrap()],
    );
    let daemon = DaemonConfig {
        storage_dir: storage_dir.to_path_buf(),
        ..DaemonConfig::default()
    };
    RuntimeConfig::new(daemon, rules)
}

fn setup() -> (TempDir, Arc<MetricDatabase>, Writer, RuntimeConfig) {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(MetricDatabase::new(Metrics::new()));
    let writer = Writer::new(db.clone());
    let config = runtime_config(temp_dir.path());
    (temp_dir, db, writer, config)
}

#[test]
fn test_largest_backlog_flushed_first() {
    let (_temp_dir, db, writer, config) = setup();

    for i in 0..3u32 {
        db.append("servers.b", T + i * 60, 1.0).unwrap();
    }
    for i in 0..10u32 {
        db.append("servers.a", T + i * 60, 1.0).unwrap();
    }

    let (name, report) = writer.flush_largest(&config).unwrap();
    assert_eq!(name, "servers.a");
    assert_eq!(report.points, 10);
    assert_eq!(report.slots_written, 10);
    assert_eq!(db.get("servers.a").unwrap().pending(), 0);
    assert_eq!(db.get("servers.b").unwrap().pending(), 3);

    let (name, report) = writer.flush_largest(&config).unwrap();
    assert_eq!(name, "servers.b");
    assert_eq!(report.points, 3);

    assert!(writer.flush_largest(&config).is_none());
}

#[test]
fn test_flush_preserves_arrival_order() {
    let (temp_dir, db, writer, config) = setup();

    db.append("servers.a", T, 1.0).unwrap();
    db.append("servers.a", T + 60, 5.0).unwrap();
    db.append("servers.a", T, 2.0).unwrap();
    writer.flush_largest(&config).unwrap();

    let mut file = WhisperFile::open(&metric_path(temp_dir.path(), "servers.a")).unwrap();
    // The later arrival for T wins its slot
    assert_eq!(file.read_point(0, 0).unwrap().value, 2.0);
    assert_eq!(file.read_point(0, 1).unwrap().value, 5.0);
}

#[test]
fn test_unresolved_points_are_dropped() {
    let (temp_dir, db, writer, config) = setup();

    db.append("clients.a", T, 1.0).unwrap();
    db.append("clients.a", T + 60, 1.0).unwrap();
    let (_, report) = writer.flush_largest(&config).unwrap();

    assert_eq!(report.unresolved, 2);
    assert_eq!(report.slots_written, 0);
    assert_eq!(db.get("clients.a").unwrap().pending(), 0);
    assert!(!metric_path(temp_dir.path(), "clients.a").exists());

    let stats = db.stats().snapshot();
    assert_eq!(stats.points_dropped, 2);
    assert_eq!(stats.write_errors, 0);
    assert_eq!(stats.flushes, 1);
}

#[test]
fn test_io_failure_aborts_only_that_flush() {
    let (temp_dir, db, writer, _) = setup();

    // Storage root is a regular file, so no directory can be created under it
    let blocked = temp_dir.path().join("blocked");
    std::fs::write(&blocked, b"").unwrap();
    let config = runtime_config(&blocked);

    db.append("servers.a", T, 1.0).unwrap();
    db.append("servers.a", T + 60, 1.0).unwrap();
    let (_, report) = writer.flush_largest(&config).unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(db.get("servers.a").unwrap().pending(), 0);
    assert_eq!(db.stats().snapshot().write_errors, 2);

    // Next buffer is unaffected once storage is usable
    let config = runtime_config(temp_dir.path());
    db.append("servers.a", T + 120, 3.0).unwrap();
    let (_, report) = writer.flush_largest(&config).unwrap();
    assert_eq!(report.slots_written, 1);
    assert_eq!(db.stats().snapshot().points_written, 1);
}

#[test]
fn test_drain_empties_everything() {
    let (_temp_dir, db, writer, config) = setup();

    for m in 0..5 {
        for i in 0..(m + 1) {
            db.append(&format!("servers.m{}", m), T + i * 60, m as f64).unwrap();
        }
    }

    assert_eq!(writer.drain(&config), 5);
    assert_eq!(db.pending_total(), 0);
    assert_eq!(db.stats().take_points_written(), 15);
}
