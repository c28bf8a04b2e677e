//! # carbond Storage Engine
//!
//! Buffers incoming metric points in memory and persists them into Whisper
//! round-robin files.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  Receivers ──> MetricDatabase ──> Writer ──> Rule Resolver  │
//! │                (per-metric        (largest      │           │
//! │                 buffers)           backlog)     ▼           │
//! │                                          Whisper file       │
//! │                                          tier 0 ─> tier 1.. │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Reload Path                            │
//! │                                                             │
//! │  SIGHUP ──> load snapshot ──> pause_all ──> swap ──> resume │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod coordinator;
pub mod database;
pub mod monitoring;
pub mod whisper;
pub mod writer;

pub use coordinator::{Coordinator, Pace, PauseGuard, Worker, WorkerState};
pub use database::{Metric, MetricDatabase};
pub use monitoring::MonitoringWorker;
pub use whisper::{metric_path, write_value, WhisperFile};
pub use writer::{flush_metric, FlushReport, Writer};
