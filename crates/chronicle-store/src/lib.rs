//! Crash-safe, append-only transcript log store for Chronicle.
//!
//! One Truth log per chat session: a line-oriented record codec, truncated
//! tail repair, a lazy skip-tolerant reader, and a store front-end that
//! de-duplicates appends by content fingerprint and supports transactional
//! full-file rebuilds.

pub mod fs_util;
pub mod health;
pub mod line_codec;
pub mod reader;
pub mod store;
pub mod tail_repair;
#[cfg(test)]
mod tests;

pub use fs_util::replace_file_atomic;
pub use health::SessionHealthReport;
pub use line_codec::{
    decode_line, encode_line, escape_payload, normalize_payload, strip_chrome, unescape_payload,
    Role,
};
pub use reader::{read_records, read_records_with_repair, LogRecord, TruthLogReader};
pub use store::{
    aggressive_normalize, record_fingerprint, AppendOutcome, RebuildTicket, TelemetryObserver,
    TranscriptStore, BACKUP_MARKER, REPAIR_AUDIT_FILE, TRUTH_LOG_FILE, TRUTH_VIEW_FILE,
};
pub use tail_repair::{repair_truncated_tail, TailRepairOutcome};
