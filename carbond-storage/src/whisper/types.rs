use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use carbond_core::{error::{Error, Result}, AggregationMethod, Retention, Timestamp};

pub const HEADER_SIZE: usize = 16;
pub const ARCHIVE_INFO_SIZE: usize = 12;
pub const POINT_SIZE: usize = 12;

/// File header, first 16 bytes of every Whisper file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub aggregation: AggregationMethod,
    pub max_retention: u32,
    pub x_files_factor: f32,
    pub archive_count: u32,
}

impl Header {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.aggregation.code())?;
        writer.write_u32::<BigEndian>(self.max_retention)?;
        writer.write_f32::<BigEndian>(self.x_files_factor)?;
        writer.write_u32::<BigEndian>(self.archive_count)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let aggregation = AggregationMethod::try_from(reader.read_u32::<BigEndian>()?)?;
        Ok(Self {
            aggregation,
            max_retention: reader.read_u32::<BigEndian>()?,
            x_files_factor: reader.read_f32::<BigEndian>()?,
            archive_count: reader.read_u32::<BigEndian>()?,
        })
    }
}

/// Archive descriptor: where a tier's ring lives and what it holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub offset: u32,
    pub seconds_per_point: u32,
    pub points: u32,
}

impl ArchiveInfo {
    pub fn size_bytes(&self) -> u64 {
        self.points as u64 * POINT_SIZE as u64
    }

    /// First byte past the archive
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size_bytes()
    }

    pub fn retention(&self) -> u64 {
        self.seconds_per_point as u64 * self.points as u64
    }

    pub fn slot_offset(&self, slot: u32) -> u64 {
        self.offset as u64 + slot as u64 * POINT_SIZE as u64
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.offset)?;
        writer.write_u32::<BigEndian>(self.seconds_per_point)?;
        writer.write_u32::<BigEndian>(self.points)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            offset: reader.read_u32::<BigEndian>()?,
            seconds_per_point: reader.read_u32::<BigEndian>()?,
            points: reader.read_u32::<BigEndian>()?,
        })
    }
}

/// One ring slot. A zero timestamp marks a slot never written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl Point {
    pub const EMPTY: Point = Point {
        timestamp: 0,
        value: 0.0,
    };

    pub fn is_empty(&self) -> bool {
        self.timestamp == 0
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.timestamp)?;
        writer.write_f64::<BigEndian>(self.value)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            timestamp: reader.read_u32::<BigEndian>()?,
            value: reader.read_f64::<BigEndian>()?,
        })
    }
}

/// Lay out archives for `tiers`: header, then every descriptor, then every ring.
pub fn layout(tiers: &[Retention]) -> Result<Vec<ArchiveInfo>> {
    let mut offset = (HEADER_SIZE + tiers.len() * ARCHIVE_INFO_SIZE) as u64;
    let mut archives = Vec::with_capacity(tiers.len());

    for tier in tiers {
        let info_offset = u32::try_from(offset).map_err(|_| Error::Whisper {
            message: format!("archive for tier {} starts beyond 4GiB", tier),
        })?;
        let info = ArchiveInfo {
            offset: info_offset,
            seconds_per_point: tier.seconds_per_point,
            points: tier.points(),
        };
        offset = info.end();
        archives.push(info);
    }

    if offset > u32::MAX as u64 {
        return Err(Error::Whisper {
            message: format!("file of {} bytes exceeds 32-bit offsets", offset),
        });
    }
    Ok(archives)
}

/// Ring slot holding `timestamp`, given the timestamp stored in slot 0.
///
/// An empty slot 0 means the ring has never been written: start there.
/// Euclidean arithmetic keeps timestamps older than `base` in range.
pub fn slot_index(base: Timestamp, timestamp: Timestamp, seconds_per_point: u32, points: u32) -> u32 {
    if base == 0 {
        return 0;
    }
    let steps = (timestamp as i64 - base as i64).div_euclid(seconds_per_point as i64);
    steps.rem_euclid(points as i64) as u32
}
