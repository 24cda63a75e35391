//! Filesystem plumbing behind the store's non-append writes.
//!
//! The Truth log itself only ever grows by whole-line appends; every other
//! artifact (view projections, compaction outputs, rebuilt logs) is replaced
//! wholesale. Replacements go through a hidden swap file in the destination
//! directory plus a rename, so a reader never observes a partial write and a
//! crash leaves at worst an orphaned swap file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;

/// Milliseconds since the Unix epoch; keeps swap and rebuild names unique.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Compact `YYYYMMDDHHMMSS` UTC stamp embedded in backup file names.
pub fn backup_stamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Hidden sibling the swap for `destination` is staged in.
fn swap_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("chronicle");
    destination.with_file_name(format!(
        ".{name}.swap-{}-{}",
        std::process::id(),
        unix_millis()
    ))
}

/// Replaces `destination` with `content` through a swap file and rename.
///
/// Parent directories are created as needed. On any failure the destination
/// keeps its previous content and the swap file is removed.
pub fn replace_file_atomic(destination: &Path, content: &str) -> Result<()> {
    if destination.as_os_str().is_empty() {
        bail!("replacement destination path is empty");
    }
    if let Some(parent) = destination
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let swap = swap_path(destination);
    let staged = File::create(&swap)
        .and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_data()
        })
        .with_context(|| format!("failed to stage swap file {}", swap.display()));
    if let Err(error) = staged {
        let _ = fs::remove_file(&swap);
        return Err(error);
    }

    if let Err(error) = fs::rename(&swap, destination) {
        let _ = fs::remove_file(&swap);
        return Err(error)
            .with_context(|| format!("failed to swap {} into place", destination.display()));
    }
    Ok(())
}
