use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use carbond_core::{
    error::{Error, Result, ResultExt},
    AggregationMethod, Retention, Timestamp,
};
use tracing::{debug, info, warn};

use super::types::*;

/// An open Whisper file with its header and archive table loaded.
#[derive(Debug)]
pub struct WhisperFile {
    path: PathBuf,
    file: File,
    header: Header,
    archives: Vec<ArchiveInfo>,
}

impl WhisperFile {
    /// Create a new file sized for `tiers`. Fails if the file already exists.
    pub fn create(
        path: &Path,
        tiers: &[Retention],
        x_files_factor: f32,
        aggregation: AggregationMethod,
    ) -> Result<Self> {
        carbond_core::validate_tiers(tiers)?;
        let archives = layout(tiers)?;
        let header = Header {
            aggregation,
            max_retention: archives.iter().map(ArchiveInfo::retention).max().unwrap_or(0) as u32,
            x_files_factor,
            archive_count: archives.len() as u32,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("creating {:?}", path))?;

        let file = match write_skeleton(file, &header, &archives) {
            Ok(file) => file,
            Err(e) => {
                // A half-written file would fail validation forever
                if let Err(remove_err) = fs::remove_file(path) {
                    warn!(path = %path.display(), "failed to remove partial file: {}", remove_err);
                }
                return Err(e);
            }
        };

        info!(
            path = %path.display(),
            archives = archives.len(),
            aggregation = %aggregation,
            x_files_factor,
            "created whisper file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            archives,
        })
    }

    /// Open an existing file, checking its header and archive table against its real size.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("opening {:?}", path))?;
        let file_len = file.metadata()?.len();

        let corrupt = |details: String| Error::Corruption {
            path: path.to_path_buf(),
            details,
        };

        if file_len < HEADER_SIZE as u64 {
            return Err(corrupt(format!("{} bytes is shorter than the header", file_len)));
        }

        let header = Header::read_from(&mut file).map_err(|e| corrupt(e.to_string()))?;
        if header.archive_count == 0 {
            return Err(corrupt("no archives".to_string()));
        }
        let data_start =
            HEADER_SIZE as u64 + header.archive_count as u64 * ARCHIVE_INFO_SIZE as u64;
        if data_start > file_len {
            return Err(corrupt(format!(
                "{} archive descriptors do not fit in {} bytes",
                header.archive_count, file_len
            )));
        }

        let mut archives = Vec::with_capacity(header.archive_count as usize);
        for i in 0..header.archive_count {
            let info = ArchiveInfo::read_from(&mut file)?;
            if info.seconds_per_point == 0 || info.points == 0 {
                return Err(corrupt(format!("archive {} is empty", i)));
            }
            if (info.offset as u64) < data_start || info.end() > file_len {
                return Err(corrupt(format!(
                    "archive {} spans {}..{} outside the data area {}..{}",
                    i,
                    info.offset,
                    info.end(),
                    data_start,
                    file_len
                )));
            }
            archives.push(info);
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            archives,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn archives(&self) -> &[ArchiveInfo] {
        &self.archives
    }

    fn archive(&self, index: usize) -> Result<ArchiveInfo> {
        self.archives.get(index).copied().ok_or_else(|| Error::Whisper {
            message: format!(
                "archive {} out of range, {:?} has {}",
                index,
                self.path,
                self.archives.len()
            ),
        })
    }

    pub fn read_point(&mut self, archive: usize, slot: u32) -> Result<Point> {
        let info = self.archive(archive)?;
        if slot >= info.points {
            return Err(Error::Whisper {
                message: format!("slot {} out of range for {} points", slot, info.points),
            });
        }
        self.file.seek(SeekFrom::Start(info.slot_offset(slot)))?;
        Point::read_from(&mut self.file)
    }

    /// Every slot of an archive in physical order
    pub fn read_archive(&mut self, archive: usize) -> Result<Vec<Point>> {
        let info = self.archive(archive)?;
        self.read_slots(info, 0, info.points)
    }

    /// `count` consecutive ring slots from `start`, wrapping past the end
    fn read_window(&mut self, info: ArchiveInfo, start: u32, count: u32) -> Result<Vec<Point>> {
        let first = count.min(info.points - start);
        let mut points = self.read_slots(info, start, first)?;
        if first < count {
            points.extend(self.read_slots(info, 0, count - first)?);
        }
        Ok(points)
    }

    fn read_slots(&mut self, info: ArchiveInfo, start: u32, count: u32) -> Result<Vec<Point>> {
        let mut buf = vec![0u8; count as usize * POINT_SIZE];
        self.file.seek(SeekFrom::Start(info.slot_offset(start)))?;
        self.file.read_exact(&mut buf)?;

        let mut reader = &buf[..];
        (0..count).map(|_| Point::read_from(&mut reader)).collect()
    }

    /// Store `value` at `timestamp` (already aligned to the archive) in its ring slot.
    pub fn write_point(&mut self, archive: usize, timestamp: Timestamp, value: f64) -> Result<()> {
        let info = self.archive(archive)?;
        let base = self.read_point(archive, 0)?.timestamp;
        let slot = slot_index(base, timestamp, info.seconds_per_point, info.points);

        let mut buf = Vec::with_capacity(POINT_SIZE);
        Point { timestamp, value }.write_to(&mut buf)?;
        self.file.seek(SeekFrom::Start(info.slot_offset(slot)))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Write one value into the finest archive and cascade into coarser ones.
    ///
    /// Returns how many slots were written, propagated ones included.
    pub fn update(&mut self, timestamp: Timestamp, value: f64) -> Result<usize> {
        let finest = self.archive(0)?;
        let aligned = timestamp - timestamp % finest.seconds_per_point;
        if aligned == 0 {
            return Err(Error::InvalidTimestamp {
                timestamp,
                reason: format!("aligns to 0 at {}s per point", finest.seconds_per_point),
            });
        }

        self.write_point(0, aligned, value)?;
        let mut written = 1;

        for lower in 1..self.archives.len() {
            if aligned % self.archives[lower].seconds_per_point != 0 {
                break;
            }
            if self.propagate(lower - 1, lower, aligned)? {
                written += 1;
            }
        }

        Ok(written)
    }

    /// Aggregate the `higher` slots covering the `lower` interval ending at `timestamp`.
    ///
    /// The window is the `lower` period `(timestamp - lower_spp, timestamp]` in
    /// `higher` resolution. Returns whether `lower` was written.
    pub fn propagate(&mut self, higher: usize, lower: usize, timestamp: Timestamp) -> Result<bool> {
        let high = self.archive(higher)?;
        let low = self.archive(lower)?;

        let ratio = low.seconds_per_point / high.seconds_per_point;
        if ratio == 0 {
            return Ok(false);
        }
        let Some(window_start) = timestamp
            .checked_add(high.seconds_per_point)
            .and_then(|t| t.checked_sub(low.seconds_per_point))
        else {
            return Ok(false);
        };

        let base = self.read_point(higher, 0)?.timestamp;
        if base == 0 {
            return Ok(false);
        }

        let window = ratio.min(high.points);
        let start = slot_index(base, window_start, high.seconds_per_point, high.points);
        let points = self.read_window(high, start, window)?;

        let known: Vec<(Timestamp, f64)> = points
            .iter()
            .enumerate()
            .filter_map(|(k, point)| {
                let expected = window_start as u64 + k as u64 * high.seconds_per_point as u64;
                (point.timestamp as u64 == expected).then_some((point.timestamp, point.value))
            })
            .collect();

        // Same precision as the stored factor, so 1/10 meets an xFilesFactor of 0.1
        let fraction = known.len() as f32 / window as f32;
        if known.is_empty() || fraction < self.header.x_files_factor {
            debug!(
                path = %self.path.display(),
                lower,
                known = known.len(),
                window,
                "below xFilesFactor, not propagating"
            );
            return Ok(false);
        }

        let Some(value) = self.header.aggregation.aggregate(&known) else {
            return Ok(false);
        };
        self.write_point(lower, timestamp, value)?;
        debug!(
            path = %self.path.display(),
            lower,
            timestamp,
            value,
            known = known.len(),
            "propagated"
        );
        Ok(true)
    }
}

fn write_skeleton(file: File, header: &Header, archives: &[ArchiveInfo]) -> Result<File> {
    let mut writer = BufWriter::new(file);
    header.write_to(&mut writer)?;
    for info in archives {
        info.write_to(&mut writer)?;
    }
    let data_bytes: u64 = archives.iter().map(ArchiveInfo::size_bytes).sum();
    io::copy(&mut io::repeat(0).take(data_bytes), &mut writer)?;
    writer.flush()?;
    writer.into_inner().map_err(|e| Error::from(e.into_error()))
}
