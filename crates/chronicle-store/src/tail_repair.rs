//! Truncation repair for a Truth log whose final record was cut mid-write.
//!
//! A well-formed log ends with the record terminator. A crash between the
//! start of an append and its final byte leaves a partial trailing line; the
//! repair truncates the file back to the last complete record boundary.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};

const SCAN_BLOCK_BYTES: u64 = 4096;
const RECORD_TERMINATOR: u8 = b'\n';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// What a repair pass did: whether it truncated, and how many bytes it cut.
pub struct TailRepairOutcome {
    pub repaired: bool,
    pub bytes_removed: u64,
}

/// Truncates an incomplete final record, returning how many bytes were cut.
///
/// Opens the file for shared read/write; writers may be appending
/// concurrently. The operation only ever shrinks the file. Idempotent: a
/// second call on a repaired file is a no-op, as is a missing or empty file.
pub fn repair_truncated_tail(path: &Path) -> Result<TailRepairOutcome> {
    if !path.exists() {
        return Ok(TailRepairOutcome::default());
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open {} for tail repair", path.display()))?;
    let length = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    if length == 0 {
        return Ok(TailRepairOutcome::default());
    }

    let mut last_byte = [0u8; 1];
    file.seek(SeekFrom::Start(length - 1))
        .with_context(|| format!("failed to seek to tail of {}", path.display()))?;
    file.read_exact(&mut last_byte)
        .with_context(|| format!("failed to read tail byte of {}", path.display()))?;
    if last_byte[0] == RECORD_TERMINATOR {
        return Ok(TailRepairOutcome::default());
    }

    // Scan backward in bounded blocks for the last complete record boundary.
    let mut scan_end = length - 1;
    loop {
        let scan_start = scan_end.saturating_sub(SCAN_BLOCK_BYTES);
        let block_len = (scan_end - scan_start) as usize;
        let mut block = vec![0u8; block_len];
        file.seek(SeekFrom::Start(scan_start))
            .with_context(|| format!("failed to seek in {}", path.display()))?;
        file.read_exact(&mut block)
            .with_context(|| format!("failed to read scan block from {}", path.display()))?;

        if let Some(offset) = block.iter().rposition(|byte| *byte == RECORD_TERMINATOR) {
            let keep = scan_start + offset as u64 + 1;
            file.set_len(keep)
                .with_context(|| format!("failed to truncate {}", path.display()))?;
            return Ok(TailRepairOutcome {
                repaired: true,
                bytes_removed: length - keep,
            });
        }

        if scan_start == 0 {
            // No terminator anywhere: nothing in the file is recoverable.
            file.set_len(0)
                .with_context(|| format!("failed to truncate {}", path.display()))?;
            return Ok(TailRepairOutcome {
                repaired: true,
                bytes_removed: length,
            });
        }
        scan_end = scan_start;
    }
}
