//! # carbond Core
//!
//! This crate provides the building blocks shared by the carbond daemon:
//! - Error types
//! - Metric points, retention tiers and aggregation methods
//! - The rule resolver and the parsers for its rule files
//! - Daemon configuration and the runtime snapshot
//! - Self-observation counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  carbond-core                   │
//! ├─────────────────────────────────────────────────┤
//! │  • types   - Points, tiers, aggregation         │
//! │  • rules   - First-match rule resolver          │
//! │  • schema  - storage-*.conf parsers             │
//! │  • config  - carbon.conf & runtime snapshot     │
//! │  • metrics - Self-observation counters          │
//! │  • error   - Error handling                     │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod rules;
pub mod schema;
pub mod types;

// Re-export commonly used types
pub use config::{DaemonConfig, RuntimeConfig};
pub use error::{Error, Result, ResultExt};
pub use metrics::{Metrics, MetricsSnapshot};
pub use rules::{AggregationRule, Pattern, RetentionRule, RuleSet};
pub use types::{
    validate_metric_name, validate_tiers, AggregationMethod, MetricPoint, Retention, Timestamp,
    METRIC_NAME_MAX_LEN,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
