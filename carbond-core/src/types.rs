//! # Core Types
//!
//! Fundamental data structures used throughout carbond.
//!
//! ## Type Design
//!
//! 1. **Plain values**: points and tiers are `Copy` and cheap to pass around
//! 2. **Validation**: constructors check their invariants once, at load time
//! 3. **Wire codes**: `AggregationMethod` carries the numeric code stored in
//!    Whisper headers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Seconds since the Unix epoch, as stored in Whisper slots
pub type Timestamp = u32;

/// Longest accepted metric name, in bytes
pub const METRIC_NAME_MAX_LEN: usize = 255;

/// A single buffered sample of a metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// One resolution tier of a retention rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Retention {
    pub seconds_per_point: u32,
    pub seconds_to_store: u32,
}

impl Retention {
    pub fn new(seconds_per_point: u32, seconds_to_store: u32) -> Result<Self> {
        if seconds_per_point == 0 {
            return Err(Error::Configuration {
                message: "seconds per point must be positive".to_string(),
            });
        }
        if seconds_to_store < seconds_per_point {
            return Err(Error::Configuration {
                message: format!(
                    "retention {}:{} stores less than one point",
                    seconds_per_point, seconds_to_store
                ),
            });
        }
        Ok(Self {
            seconds_per_point,
            seconds_to_store,
        })
    }

    /// Number of slots the tier's ring holds
    pub fn points(&self) -> u32 {
        self.seconds_to_store / self.seconds_per_point
    }

    /// Time actually covered by the ring
    pub fn retention(&self) -> u64 {
        self.seconds_per_point as u64 * self.points() as u64
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.seconds_per_point, self.seconds_to_store)
    }
}

/// Checks tier ordering: strictly coarser, each period a multiple of the previous one.
///
/// Propagation only ever reads the immediately finer tier, so a coarser tier
/// whose period does not divide evenly would silently stop the cascade. The
/// finer ring must also hold at least one full coarser interval.
pub fn validate_tiers(tiers: &[Retention]) -> Result<()> {
    if tiers.is_empty() {
        return Err(Error::Configuration {
            message: "retention list is empty".to_string(),
        });
    }

    for pair in tiers.windows(2) {
        let (finer, coarser) = (pair[0], pair[1]);
        if coarser.seconds_per_point <= finer.seconds_per_point {
            return Err(Error::Configuration {
                message: format!(
                    "tier {} is not coarser than tier {}",
                    coarser, finer
                ),
            });
        }
        if coarser.seconds_per_point % finer.seconds_per_point != 0 {
            return Err(Error::Configuration {
                message: format!(
                    "tier {} period is not a multiple of tier {} period",
                    coarser, finer
                ),
            });
        }
        if finer.points() < coarser.seconds_per_point / finer.seconds_per_point {
            return Err(Error::Configuration {
                message: format!(
                    "tier {} holds fewer points than one tier {} interval",
                    finer, coarser
                ),
            });
        }
    }

    // Whisper offsets are 32-bit: 16-byte header, 12 bytes per descriptor and per point
    let file_size = 16 + 12 * tiers.len() as u64
        + tiers.iter().map(|t| 12 * t.points() as u64).sum::<u64>();
    if file_size > u32::MAX as u64 {
        return Err(Error::Configuration {
            message: format!("tiers need a {} byte file, over the 4GiB limit", file_size),
        });
    }

    Ok(())
}

/// How finer points are folded into one coarser point.
///
/// The discriminants are the codes persisted in the Whisper header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AggregationMethod {
    Average = 1,
    Sum = 2,
    Last = 3,
    Max = 4,
    Min = 5,
}

impl AggregationMethod {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AggregationMethod::Average => "average",
            AggregationMethod::Sum => "sum",
            AggregationMethod::Last => "last",
            AggregationMethod::Max => "max",
            AggregationMethod::Min => "min",
        }
    }

    /// Aggregate known `(timestamp, value)` pairs. Returns `None` when there is nothing to aggregate.
    pub fn aggregate(self, known: &[(Timestamp, f64)]) -> Option<f64> {
        if known.is_empty() {
            return None;
        }
        let values = known.iter().map(|(_, v)| *v);
        let value = match self {
            AggregationMethod::Average => values.sum::<f64>() / known.len() as f64,
            AggregationMethod::Sum => values.sum(),
            AggregationMethod::Last => {
                known.iter().max_by_key(|(ts, _)| *ts).map(|(_, v)| *v)?
            }
            AggregationMethod::Max => values.fold(f64::NEG_INFINITY, f64::max),
            AggregationMethod::Min => values.fold(f64::INFINITY, f64::min),
        };
        Some(value)
    }
}

impl TryFrom<u32> for AggregationMethod {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(AggregationMethod::Average),
            2 => Ok(AggregationMethod::Sum),
            3 => Ok(AggregationMethod::Last),
            4 => Ok(AggregationMethod::Max),
            5 => Ok(AggregationMethod::Min),
            _ => Err(Error::Whisper {
                message: format!("Invalid aggregation type: {}", value),
            }),
        }
    }
}

impl FromStr for AggregationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "average" | "avg" => Ok(AggregationMethod::Average),
            "sum" => Ok(AggregationMethod::Sum),
            "last" => Ok(AggregationMethod::Last),
            "max" => Ok(AggregationMethod::Max),
            "min" => Ok(AggregationMethod::Min),
            other => Err(Error::Configuration {
                message: format!("unknown aggregation method {:?}", other),
            }),
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a dotted metric name before it is buffered or mapped to a path.
pub fn validate_metric_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidMetricName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if name.len() > METRIC_NAME_MAX_LEN {
        return Err(invalid("name too long"));
    }
    for segment in name.split('.') {
        // Also rules out "." and ".." path components
        if segment.is_empty() {
            return Err(invalid("empty path segment"));
        }
        if segment.contains(['/', '\\', '\0']) || segment.chars().any(char::is_whitespace) {
            return Err(invalid("forbidden character"));
        }
    }
    Ok(())
}
