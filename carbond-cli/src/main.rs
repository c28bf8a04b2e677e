//! # whisper-tool
//!
//! Inspect Whisper files written by carbond.
//!
//! ```text
//! whisper-tool info  /var/lib/carbon/servers/web1/cpu.wsp
//! whisper-tool dump  /var/lib/carbon/servers/web1/cpu.wsp --archive 1 --non-empty
//! ```

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use carbond_storage::whisper::{ArchiveInfo, WhisperFile};

#[derive(Parser)]
#[command(name = "whisper-tool")]
#[command(about = "Inspect Whisper round-robin files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Print the header and archive table
    Info {
        file: PathBuf,
    },
    /// Print every slot of every archive
    Dump {
        file: PathBuf,
        /// Only this archive
        #[arg(short, long)]
        archive: Option<usize>,
        /// Skip slots that were never written
        #[arg(long)]
        non_empty: bool,
    },
}

fn render_info(file: &WhisperFile) -> String {
    let header = file.header();
    let mut out = String::new();
    let _ = writeln!(out, "path: {}", file.path().display());
    let _ = writeln!(out, "aggregation method: {}", header.aggregation);
    let _ = writeln!(out, "max retention: {}", header.max_retention);
    let _ = writeln!(out, "xFilesFactor: {}", header.x_files_factor);
    let _ = writeln!(out, "archives: {}", header.archive_count);

    for (i, info) in file.archives().iter().enumerate() {
        let _ = writeln!(out);
        render_archive_info(&mut out, i, info);
    }
    out
}

fn render_archive_info(out: &mut String, index: usize, info: &ArchiveInfo) {
    let _ = writeln!(out, "archive {}", index);
    let _ = writeln!(out, "  offset: {}", info.offset);
    let _ = writeln!(out, "  seconds per point: {}", info.seconds_per_point);
    let _ = writeln!(out, "  points: {}", info.points);
    let _ = writeln!(out, "  retention: {}", info.retention());
    let _ = writeln!(out, "  size: {}", info.size_bytes());
}

fn render_dump(file: &mut WhisperFile, archive: Option<usize>, non_empty: bool) -> Result<String> {
    let count = file.archives().len();
    let selected: Vec<usize> = match archive {
        Some(i) if i >= count => bail!("archive {} out of range, file has {}", i, count),
        Some(i) => vec![i],
        None => (0..count).collect(),
    };

    let mut out = String::new();
    for i in selected {
        let info = file.archives()[i];
        let points = file.read_archive(i)?;

        let _ = writeln!(out, "archive {} ({}s per point, {} points)", i, info.seconds_per_point, info.points);
        for (slot, point) in points.iter().enumerate() {
            if non_empty && point.is_empty() {
                continue;
            }
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}",
                slot,
                info.slot_offset(slot as u32),
                point.timestamp,
                point.value
            );
        }
    }
    Ok(out)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { file } => {
            let whisper = WhisperFile::open(&file).with_context(|| format!("opening {}", file.display()))?;
            print!("{}", render_info(&whisper));
        }
        Commands::Dump {
            file,
            archive,
            non_empty,
        } => {
            let mut whisper =
                WhisperFile::open(&file).with_context(|| format!("opening {}", file.display()))?;
            print!("{}", render_dump(&mut whisper, archive, non_empty)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbond_core::{AggregationMethod, Retention};
    use tempfile::TempDir;

    fn sample(dir: &TempDir) -> WhisperFile {
        let tiers = [
            Retention::new(60, 600).unwrap(),
            Retention::new(300, 3000).unwrap(),
        ];
        let mut file =
            WhisperFile::create(&dir.path().join("a.wsp"), &tiers, 0.0, AggregationMethod::Max)
                .unwrap();
        file.update(1_700_000_100, 5.0).unwrap();
        file
    }

    #[test]
    fn test_render_info() {
        let temp_dir = TempDir::new().unwrap();
        let file = sample(&temp_dir);
        let out = render_info(&file);
        assert!(out.contains("aggregation method: max"));
        assert!(out.contains("max retention: 3000"));
        assert!(out.contains("archives: 2"));
        assert!(out.contains("archive 1\n  offset: 160\n  seconds per point: 300\n  points: 10"));
    }

    #[test]
    fn test_render_dump() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = sample(&temp_dir);

        let out = render_dump(&mut file, None, false).unwrap();
        assert_eq!(out.lines().count(), 2 + 10 + 10);

        let out = render_dump(&mut file, Some(1), true).unwrap();
        assert_eq!(out, "archive 1 (300s per point, 10 points)\n0\t160\t1700000100\t5\n");

        assert!(render_dump(&mut file, Some(2), false).is_err());
    }
}
