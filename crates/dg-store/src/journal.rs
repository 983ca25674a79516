//! # Journal — Crc-Framed JSON Lines
//!
//! Durability for the event store: one append-only file per partition
//! (`<dir>/<kind>.evj`). Each line frames one event:
//!
//! ```text
//! %08x<space><json><newline>
//! ```
//!
//! where the hex prefix is the crc32 of the JSON bytes. Replay is
//! permissive: the first line of a file that fails the crc or does not
//! deserialize ends replay of that file with a warning, tolerating a torn
//! tail after a crash. Everything before it is kept.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use dg_core::{EventKind, EventRecord, ALL_KINDS};

use crate::StoreError;

/// File extension for partition journal files.
pub const JOURNAL_EXT: &str = "evj";

pub struct Journal {
    /// One writer per partition, in wire-value order.
    writers: [BufWriter<File>; 4],
}

impl Journal {
    /// Open (or create) the journal files under `dir`, replaying surviving
    /// rows from each. Returns the journal plus every replayed record.
    pub fn open(dir: &Path) -> Result<(Self, Vec<EventRecord>), StoreError> {
        std::fs::create_dir_all(dir)?;

        let mut replayed = Vec::new();
        for kind in ALL_KINDS {
            let path = partition_path(dir, kind.name());
            if path.exists() {
                replay_file(&path, &mut replayed)?;
            }
        }

        let open_writer = |kind: EventKind| -> Result<BufWriter<File>, StoreError> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(partition_path(dir, kind.name()))?;
            Ok(BufWriter::new(file))
        };
        let [fault, statistic, security, behavior] = ALL_KINDS.map(open_writer);
        let writers = [fault?, statistic?, security?, behavior?];

        Ok((Self { writers }, replayed))
    }

    /// Append one record to its partition file and flush it.
    pub fn append(&mut self, record: &EventRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)
            .map_err(|e| StoreError::InvalidEvent(e.to_string()))?;
        let crc = crc32fast::hash(json.as_bytes());
        let writer = &mut self.writers[(record.kind.as_u32() - 1) as usize];
        writeln!(writer, "{crc:08x} {json}")?;
        writer.flush()?;
        Ok(())
    }
}

fn partition_path(dir: &Path, kind: &str) -> PathBuf {
    dir.join(format!("{kind}.{JOURNAL_EXT}"))
}

/// Replay one partition file into `out`, stopping at the first corrupt line.
fn replay_file(path: &Path, out: &mut Vec<EventRecord>) -> Result<(), StoreError> {
    let reader = BufReader::new(File::open(path)?);
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        match decode_line(&line) {
            Some(record) => out.push(record),
            None => {
                tracing::warn!(
                    file = %path.display(),
                    line = index + 1,
                    "corrupt journal line, dropping file tail"
                );
                break;
            }
        }
    }
    Ok(())
}

fn decode_line(line: &str) -> Option<EventRecord> {
    let (crc_hex, json) = line.split_once(' ')?;
    let stored_crc = u32::from_str_radix(crc_hex, 16).ok()?;
    if crc32fast::hash(json.as_bytes()) != stored_crc {
        return None;
    }
    serde_json::from_str(json).ok()
}
