//! Whisper: fixed-size, multi-resolution round-robin files.
//!
//! File Layout (all fields big-endian)
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Header (16 bytes)                                          │
//! │    - Aggregation Type (4 bytes)                             │
//! │    - Max Retention (4 bytes, seconds)                       │
//! │    - xFilesFactor (4 bytes, f32)                            │
//! │    - Archive Count (4 bytes)                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Archive Info x N (12 bytes each, finest first)             │
//! │    - Offset (4 bytes, absolute)                             │
//! │    - Seconds Per Point (4 bytes)                            │
//! │    - Points (4 bytes)                                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Archive 0 ring: Points x 12 bytes                          │
//! │    - Timestamp (4 bytes, 0 = empty)                         │
//! │    - Value (8 bytes, f64)                                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Archive 1 ring ...                                         │
//! └─────────────────────────────────────────────────────────────┘
//!
//! Files are never resized. A write lands in archive 0 and cascades into
//! coarser archives while the timestamp stays aligned to their period.

mod file;
mod types;

pub use file::WhisperFile;
pub use types::{
    layout, slot_index, ArchiveInfo, Header, Point, ARCHIVE_INFO_SIZE, HEADER_SIZE, POINT_SIZE,
};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use carbond_core::{validate_metric_name, Error, Result, RuleSet, Timestamp};

pub const FILE_EXTENSION: &str = "wsp";

/// `a.b.c` maps to `<root>/a/b/c.wsp`
pub fn metric_path(root: &Path, metric: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    path.extend(metric.split('.'));
    path.set_extension(FILE_EXTENSION);
    path
}

/// Persist one point for `metric`, creating its file from the rules on first write.
///
/// Returns the number of slots written. A metric with no matching retention
/// or aggregation rule gets no file.
pub fn write_value(
    storage_dir: &Path,
    rules: &RuleSet,
    metric: &str,
    timestamp: Timestamp,
    value: f64,
) -> Result<usize> {
    validate_metric_name(metric)?;
    let path = metric_path(storage_dir, metric);

    let mut file = match WhisperFile::open(&path) {
        Ok(file) => file,
        Err(Error::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            let tiers = rules.resolve_retention(metric).ok_or_else(|| Error::NoRetention {
                metric: metric.to_string(),
            })?;
            let (x_files_factor, method) =
                rules.resolve_aggregation(metric).ok_or_else(|| Error::NoAggregation {
                    metric: metric.to_string(),
                })?;
            WhisperFile::create(&path, tiers, x_files_factor, method)?
        }
        Err(e) => return Err(e),
    };

    file.update(timestamp, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_path() {
        let root = Path::new("/var/lib/carbon");
        assert_eq!(
            metric_path(root, "servers.web1.cpu"),
            PathBuf::from("/var/lib/carbon/servers/web1/cpu.wsp")
        );
        assert_eq!(metric_path(root, "cpu"), PathBuf::from("/var/lib/carbon/cpu.wsp"));
    }
}
