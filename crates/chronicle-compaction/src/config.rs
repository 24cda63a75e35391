//! Tunable constants for the compaction pipeline.
//!
//! The continuation thresholds are deliberately approximate heuristics; the
//! `Default` impl is the single source of the tuned values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
/// Tuning knobs for pairing, slicing, and packing.
pub struct CompactionConfig {
    /// Hard character budget for the packed document.
    pub pack_budget_chars: usize,
    /// Number of most-recent exchanges pinned ahead of the budget.
    pub pinned_exchanges: usize,
    /// A single exchange may overflow the budget if it is under this cap.
    pub overflow_exchange_cap: usize,
    /// Per-side character budget applied by the slicing rules.
    pub side_slice_budget: usize,
    /// Combined redacted length above which both sides of an exchange are
    /// replaced with omission markers.
    pub exchange_hard_ceiling: usize,
    /// How many leading characters the continuation heuristic examines.
    pub continuation_probe_chars: usize,
    /// Shared-prefix character floor for the continuation heuristic.
    pub continuation_min_shared_chars: usize,
    /// Shared-prefix ratio floor for the continuation heuristic.
    pub continuation_min_shared_ratio: f64,
    /// Token marking conversational anchors in assistant turns.
    pub anchor_marker: String,
    /// Fixed preamble prepended to every essence payload.
    pub preamble: String,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            pack_budget_chars: 28_000,
            pinned_exchanges: 2,
            overflow_exchange_cap: 6_000,
            side_slice_budget: 3_500,
            exchange_hard_ceiling: 24_000,
            continuation_probe_chars: 200,
            continuation_min_shared_chars: 60,
            continuation_min_shared_ratio: 0.6,
            anchor_marker: "»»".to_string(),
            preamble: "Continuation seed assembled mechanically from the stored transcript. \
                       The authoritative section reflects the latest state of the conversation."
                .to_string(),
        }
    }
}
