//! Deterministic, budget-aware compaction of a Chronicle transcript.
//!
//! Turns an unbounded Truth log into a size-capped, structurally faithful
//! handoff document without any semantic inference: normalization, exchange
//! pairing, slicing/redaction, budget packing, and final assembly are all
//! mechanical text passes.

pub mod assemble;
pub mod config;
pub mod normalize;
pub mod packer;
pub mod pairing;
pub mod pipeline;
pub mod slicing;

pub use assemble::assemble_essence;
pub use config::CompactionConfig;
pub use normalize::{normalize_records, Message};
pub use packer::{
    pack_exchanges, ACTIVE_THREAD_HEADING, AUTHORITATIVE_HEADING, REFERENCE_HEADING,
};
pub use pairing::{compact_whitespace, is_streaming_continuation, pair_exchanges, Exchange};
pub use pipeline::{
    CompactionPipeline, ESSENCE_ARTIFACT_FILE, RESTRUCTURED_ARTIFACT_FILE, SEED_ARTIFACT_FILE,
};
pub use slicing::{
    anchor_window_slice, collapse_repeated_paragraphs, head_tail_slice, strip_noise,
};
