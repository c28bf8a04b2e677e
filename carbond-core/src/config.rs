//! # Configuration Management
//!
//! Handles `carbon.conf` and the runtime snapshot shared with the workers.
//!
//! `carbon.conf` is a flat list of `KEY=VALUE` lines:
//!
//! ```text
//! CONF_DIR=/etc/carbon
//! STORAGE_DIR=/var/lib/carbon
//! LINE_RECEIVER_PORT=2003
//! UDP_RECEIVER_PORT=2003
//! ```
//!
//! Rule files are read from `CONF_DIR`, see [`crate::schema`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result, ResultExt};
use crate::rules::RuleSet;
use crate::schema::{
    load_storage_aggregation, load_storage_schemas, STORAGE_AGGREGATION_FILE,
    STORAGE_SCHEMAS_FILE,
};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/carbon/carbon.conf";

/// Daemon-level settings from `carbon.conf`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub conf_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub line_receiver_port: u16,
    pub udp_receiver_port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/carbon"),
            storage_dir: PathBuf::from("/var/lib/carbon"),
            line_receiver_port: 2003,
            udp_receiver_port: 2003,
        }
    }
}

impl DaemonConfig {
    /// Parse `carbon.conf` text. Keys not present keep their defaults.
    pub fn parse(origin: &str, text: &str) -> Result<Self> {
        let mut config = Self::default();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let err = |message: String| Error::Configuration {
                message: format!("{}:{}: {}", origin, line_no, message),
            };
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| err(format!("expected KEY=VALUE, got {:?}", line)))?;
            let port = || {
                value
                    .parse::<u16>()
                    .map_err(|_| err(format!("invalid port {:?} for {}", value, key)))
            };

            match key {
                "CONF_DIR" => config.conf_dir = PathBuf::from(value),
                "STORAGE_DIR" => config.storage_dir = PathBuf::from(value),
                "LINE_RECEIVER_PORT" => config.line_receiver_port = port()?,
                "UDP_RECEIVER_PORT" => config.udp_receiver_port = port()?,
                other => return Err(err(format!("unknown key {:?}", other))),
            }
        }

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        Self::parse(&path.display().to_string(), &text)
    }

    pub fn storage_schemas_path(&self) -> PathBuf {
        self.conf_dir.join(STORAGE_SCHEMAS_FILE)
    }

    pub fn storage_aggregation_path(&self) -> PathBuf {
        self.conf_dir.join(STORAGE_AGGREGATION_FILE)
    }
}

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Immutable configuration snapshot. Reloads build a new one and swap it in whole.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub version: u64,
    pub daemon: DaemonConfig,
    pub rules: RuleSet,
}

impl RuntimeConfig {
    pub fn new(daemon: DaemonConfig, rules: RuleSet) -> Self {
        Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            daemon,
            rules,
        }
    }

    /// Load `carbon.conf` and both rule files it points at
    pub fn load(config_file: &Path) -> Result<Arc<Self>> {
        let daemon = DaemonConfig::load(config_file)?;
        let retentions = load_storage_schemas(&daemon.storage_schemas_path())?;
        let aggregations = load_storage_aggregation(&daemon.storage_aggregation_path())?;

        info!(
            config = %config_file.display(),
            retention_rules = retentions.len(),
            aggregation_rules = aggregations.len(),
            "configuration loaded"
        );

        Ok(Arc::new(Self::new(daemon, RuleSet::new(retentions, aggregations))))
    }
}
