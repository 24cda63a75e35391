//! Structural cleanup of raw log records into an ordered message sequence.
//!
//! Decodes escaped newlines, strips known UI chrome, and drops records that
//! become empty. No content filtering happens here; the pass must stay
//! lossless for substantive turns.

use chronicle_store::{strip_chrome, unescape_payload, LogRecord, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
/// One normalized transcript turn, ready for pairing.
pub struct Message {
    pub role: Role,
    pub text: String,
    /// Physical line number of the backing record, for diagnostics.
    pub source_line: u64,
}

/// Converts raw stored records into the normalized message sequence.
pub fn normalize_records(records: &[LogRecord]) -> Vec<Message> {
    records
        .iter()
        .filter_map(|record| {
            let text = strip_chrome(&unescape_payload(&record.payload));
            if text.is_empty() {
                return None;
            }
            Some(Message {
                role: record.role,
                text,
                source_line: record.line_number,
            })
        })
        .collect()
}
