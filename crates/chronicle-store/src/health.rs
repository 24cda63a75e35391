//! Structural health reporting for one session's Truth log.
//!
//! Derived entirely from a shared-access read pass; safe to run while
//! writers are appending. A concurrent replace or truncate merely skews the
//! counts of this pass.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::line_codec::{decode_line, Role};
use crate::store::{TranscriptStore, REPAIR_AUDIT_FILE};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Structural counters for one session's log file and its repair history.
pub struct SessionHealthReport {
    pub session_id: String,
    pub log_exists: bool,
    pub file_bytes: u64,
    pub record_count: u64,
    pub user_records: u64,
    pub assistant_records: u64,
    pub malformed_lines: u64,
    pub blank_lines: u64,
    pub repair_events: u64,
    pub duplicates_suppressed: u64,
}

#[derive(Debug, Default)]
struct LogScan {
    file_bytes: u64,
    record_count: u64,
    user_records: u64,
    assistant_records: u64,
    malformed_lines: u64,
    blank_lines: u64,
}

fn scan_log(path: &Path) -> LogScan {
    let mut scan = LogScan {
        file_bytes: std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0),
        ..LogScan::default()
    };
    let Ok(file) = File::open(path) else {
        return scan;
    };
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            scan.blank_lines += 1;
            continue;
        }
        match decode_line(&line) {
            Some((Role::User, _)) => {
                scan.record_count += 1;
                scan.user_records += 1;
            }
            Some((Role::Assistant, _)) => {
                scan.record_count += 1;
                scan.assistant_records += 1;
            }
            None => scan.malformed_lines += 1,
        }
    }
    scan
}

fn count_repair_audit_lines(path: &Path) -> u64 {
    let Ok(file) = File::open(path) else {
        return 0;
    };
    BufReader::new(file)
        .lines()
        .map_while(|line| line.ok())
        .filter(|line| !line.trim().is_empty())
        .count() as u64
}

impl TranscriptStore {
    /// Derives a structural health report for one session. Never raises;
    /// a missing or unreadable file yields zeroed counts.
    pub fn health_report(&self, session_id: &str) -> SessionHealthReport {
        let log_path = self.log_path(session_id);
        let log_exists = log_path.exists();
        let scan = if log_exists {
            scan_log(&log_path)
        } else {
            LogScan::default()
        };
        let audit_path = self.session_dir(session_id).join(REPAIR_AUDIT_FILE);
        let repair_events =
            count_repair_audit_lines(&audit_path).max(self.observed_repair_events(session_id));

        SessionHealthReport {
            session_id: session_id.trim().to_string(),
            log_exists,
            file_bytes: scan.file_bytes,
            record_count: scan.record_count,
            user_records: scan.user_records,
            assistant_records: scan.assistant_records,
            malformed_lines: scan.malformed_lines,
            blank_lines: scan.blank_lines,
            repair_events,
            duplicates_suppressed: self.duplicates_suppressed(session_id),
        }
    }
}
