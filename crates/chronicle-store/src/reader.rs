//! Lazy, restartable reader over a Truth log file.
//!
//! Yields only well-formed records. Blank and malformed lines are skipped,
//! but line numbers always reflect physical position so gaps stay meaningful
//! for diagnostics. Any I/O failure ends the sequence instead of raising.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::{Context, Result};

use crate::line_codec::{decode_line, Role};
use crate::tail_repair::repair_truncated_tail;

#[derive(Debug, Clone, PartialEq, Eq)]
/// One well-formed record read back from a Truth log.
pub struct LogRecord {
    /// 1-based physical line number, including skipped lines.
    pub line_number: u64,
    pub role: Role,
    /// Raw payload as stored, with newlines still escaped.
    pub payload: String,
}

/// Streaming iterator over the well-formed records of one log file.
pub struct TruthLogReader {
    lines: Lines<BufReader<File>>,
    line_number: u64,
}

impl TruthLogReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }

    /// Opens the file after repairing a possibly truncated tail.
    pub fn open_with_repair(path: &Path) -> Result<Self> {
        repair_truncated_tail(path)?;
        Self::open(path)
    }
}

impl Iterator for TruthLogReader {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                // An I/O failure ends the sequence rather than raising.
                Err(_) => return None,
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(&line) {
                Some((role, payload)) => {
                    return Some(LogRecord {
                        line_number: self.line_number,
                        role,
                        payload: payload.to_string(),
                    });
                }
                None => continue,
            }
        }
    }
}

/// Reads every well-formed record of a log file, empty when the file is missing.
pub fn read_records(path: &Path) -> Vec<LogRecord> {
    if !path.exists() {
        return Vec::new();
    }
    match TruthLogReader::open(path) {
        Ok(reader) => reader.collect(),
        Err(_) => Vec::new(),
    }
}

/// Like [`read_records`] but repairs a truncated tail first.
pub fn read_records_with_repair(path: &Path) -> Vec<LogRecord> {
    if !path.exists() {
        return Vec::new();
    }
    match TruthLogReader::open_with_repair(path) {
        Ok(reader) => reader.collect(),
        Err(_) => Vec::new(),
    }
}
