//! End-to-end compaction run: read → normalize → pair → pack → assemble.
//!
//! Audit artifacts are written beside the log best-effort; a failed artifact
//! write never fails the run. The run itself never raises; an empty or
//! unreadable transcript simply yields no payload.

use std::path::Path;

use tracing::{debug, warn};

use chronicle_handoff::{HandoffPayload, HandoffQueue};
use chronicle_store::{
    read_records_with_repair, replace_file_atomic, TranscriptStore, TRUTH_LOG_FILE,
};

use crate::assemble::assemble_essence;
use crate::config::CompactionConfig;
use crate::normalize::normalize_records;
use crate::packer::pack_exchanges;
use crate::pairing::{pair_exchanges, Exchange};

/// Filter 1 projection, human-auditable.
pub const SEED_ARTIFACT_FILE: &str = "Seed.log";
/// Filter 2 output.
pub const RESTRUCTURED_ARTIFACT_FILE: &str = "RestructuredSeed.log";
/// Final essence payload.
pub const ESSENCE_ARTIFACT_FILE: &str = "Essence.txt";

#[derive(Debug, Clone, Default)]
/// Drives one full compaction pass over a session's transcript.
pub struct CompactionPipeline {
    config: CompactionConfig,
}

impl CompactionPipeline {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Runs one compaction pass for a session. Returns `None` when the
    /// transcript is missing, empty, or yields no exchanges.
    pub fn run(
        &self,
        store: &TranscriptStore,
        session_id: &str,
        mode: &str,
        open_new_session: bool,
    ) -> Option<HandoffPayload> {
        let log_path = store.log_path(session_id);
        let records = read_records_with_repair(&log_path);
        if records.is_empty() {
            debug!(session_id, "compaction skipped: no records");
            return None;
        }

        let messages = normalize_records(&records);
        let exchanges = pair_exchanges(&messages, &self.config);
        if exchanges.is_empty() {
            debug!(session_id, "compaction skipped: no exchanges");
            return None;
        }

        let session_dir = store.session_dir(session_id);
        write_artifact(
            &session_dir.join(SEED_ARTIFACT_FILE),
            &render_seed(&exchanges),
        );

        let packed = pack_exchanges(&exchanges, &self.config);
        write_artifact(&session_dir.join(RESTRUCTURED_ARTIFACT_FILE), &packed);

        let essence = assemble_essence(&packed, session_id, mode, &self.config.preamble);
        write_artifact(&session_dir.join(ESSENCE_ARTIFACT_FILE), &essence);

        Some(HandoffPayload {
            session_id: session_id.trim().to_string(),
            mode: mode.to_string(),
            text: essence,
            open_new_session,
            source_label: TRUTH_LOG_FILE.to_string(),
            artifact_label: ESSENCE_ARTIFACT_FILE.to_string(),
        })
    }

    /// Runs a pass and enqueues the payload for delivery. Returns whether a
    /// payload was produced and accepted by the queue.
    pub fn run_and_enqueue(
        &self,
        store: &TranscriptStore,
        session_id: &str,
        mode: &str,
        open_new_session: bool,
        queue: &HandoffQueue,
    ) -> bool {
        match self.run(store, session_id, mode, open_new_session) {
            Some(payload) => queue.enqueue(payload),
            None => false,
        }
    }
}

/// Human-auditable rendering of the paired exchanges.
fn render_seed(exchanges: &[Exchange]) -> String {
    let mut seed = String::new();
    for exchange in exchanges {
        seed.push_str(&format!(
            "[Exchange {} | user line {} | assistant line {}]\n",
            exchange.index,
            exchange
                .user_line
                .map(|line| line.to_string())
                .unwrap_or_else(|| "-".to_string()),
            exchange
                .assistant_line
                .map(|line| line.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ));
        if !exchange.user_text.is_empty() {
            seed.push_str("User:\n");
            seed.push_str(&exchange.user_text);
            seed.push('\n');
        }
        if !exchange.assistant_text.is_empty() {
            seed.push_str("Assistant:\n");
            seed.push_str(&exchange.assistant_text);
            seed.push('\n');
        }
        seed.push('\n');
    }
    seed.trim_end().to_string()
}

fn write_artifact(path: &Path, content: &str) {
    if let Err(error) = replace_file_atomic(path, content) {
        warn!(path = %path.display(), %error, "audit artifact write failed");
    }
}
