//! Filter 1: groups the message sequence into user/assistant exchanges.
//!
//! Streaming captures re-deliver assistant turns as they grow, and older
//! responses occasionally replay out of order. The pairer reconciles both:
//! a replay guard drops assistant messages whose compacted fingerprint
//! already opened an earlier exchange, and a continuation heuristic decides
//! whether a follow-up assistant message updates or is unrelated to the one
//! just captured. Check order matters and is fixed: replay guard first.

use std::collections::HashSet;

use chronicle_store::Role;

use crate::config::CompactionConfig;
use crate::normalize::Message;
use crate::slicing::{redact_assistant_side, redact_user_side, OVERSIZED_TURN_STUB};

#[derive(Debug, Clone, PartialEq, Eq)]
/// One reconciled user/assistant exchange, already sliced and redacted.
pub struct Exchange {
    /// 1-based position in the transcript.
    pub index: usize,
    pub user_text: String,
    pub assistant_text: String,
    pub user_line: Option<u64>,
    pub assistant_line: Option<u64>,
}

impl Exchange {
    pub fn combined_len(&self) -> usize {
        self.user_text.chars().count() + self.assistant_text.chars().count()
    }
}

/// Collapses all whitespace runs to single spaces for fingerprint-style
/// comparisons.
pub fn compact_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deliberately approximate heuristic: is `candidate` a streaming
/// continuation/update of `previous`?
///
/// True when either compacted text is a prefix of the other, or when the
/// first `continuation_probe_chars` characters share a common prefix that
/// clears the lower of two bars: `continuation_min_shared_chars` characters,
/// or `continuation_min_shared_ratio` of the probe window.
pub fn is_streaming_continuation(
    previous: &str,
    candidate: &str,
    config: &CompactionConfig,
) -> bool {
    let previous = compact_whitespace(previous);
    let candidate = compact_whitespace(candidate);
    if previous.is_empty() || candidate.is_empty() {
        return true;
    }
    if previous.starts_with(&candidate) || candidate.starts_with(&previous) {
        return true;
    }

    let probe = config.continuation_probe_chars;
    let previous_probe: Vec<char> = previous.chars().take(probe).collect();
    let candidate_probe: Vec<char> = candidate.chars().take(probe).collect();
    let window = previous_probe.len().min(candidate_probe.len());
    if window == 0 {
        return false;
    }
    let shared = previous_probe
        .iter()
        .zip(candidate_probe.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let ratio_floor = (window as f64 * config.continuation_min_shared_ratio).ceil() as usize;
    let threshold = config.continuation_min_shared_chars.min(ratio_floor);
    shared >= threshold
}

#[derive(Debug, Default)]
struct OpenExchange {
    user_text: String,
    assistant_text: String,
    user_line: Option<u64>,
    assistant_line: Option<u64>,
    /// Compacted fingerprint of the message that opened the assistant side.
    opener_fingerprint: Option<String>,
}

impl OpenExchange {
    fn is_empty(&self) -> bool {
        self.user_text.is_empty() && self.assistant_text.is_empty()
    }
}

/// Walks the message sequence and produces the finalized exchange list.
/// Deterministic: a fixed input yields the same exchanges on every run.
pub fn pair_exchanges(messages: &[Message], config: &CompactionConfig) -> Vec<Exchange> {
    let mut exchanges: Vec<Exchange> = Vec::new();
    let mut consumed_openers: HashSet<String> = HashSet::new();
    let mut current = OpenExchange::default();

    for message in messages {
        match message.role {
            Role::User => {
                if !current.assistant_text.is_empty() {
                    finalize(&mut exchanges, &mut consumed_openers, &mut current, config);
                }
                if current.user_text.is_empty() {
                    current.user_text = message.text.clone();
                    current.user_line = Some(message.source_line);
                } else {
                    current.user_text.push('\n');
                    current.user_text.push_str(&message.text);
                }
            }
            Role::Assistant => {
                let compacted = compact_whitespace(&message.text);
                // Replay guard runs before the continuation check.
                if consumed_openers.contains(&compacted) {
                    continue;
                }
                if current.assistant_text.is_empty() {
                    current.assistant_text = message.text.clone();
                    current.assistant_line = Some(message.source_line);
                    current.opener_fingerprint = Some(compacted);
                } else if is_streaming_continuation(
                    &current.assistant_text,
                    &message.text,
                    config,
                ) {
                    // Streaming overwrite: keep whichever rendition is longer.
                    if message.text.chars().count() > current.assistant_text.chars().count() {
                        current.assistant_text = message.text.clone();
                        current.assistant_line = Some(message.source_line);
                    }
                }
                // Unrelated assistant text while one is captured is replay noise.
            }
        }
    }
    if !current.is_empty() {
        finalize(&mut exchanges, &mut consumed_openers, &mut current, config);
    }
    exchanges
}

fn finalize(
    exchanges: &mut Vec<Exchange>,
    consumed_openers: &mut HashSet<String>,
    current: &mut OpenExchange,
    config: &CompactionConfig,
) {
    let open = std::mem::take(current);
    if open.is_empty() {
        return;
    }
    if let Some(fingerprint) = open.opener_fingerprint {
        consumed_openers.insert(fingerprint);
    }

    let user_text = if open.user_text.is_empty() {
        String::new()
    } else {
        redact_user_side(&open.user_text, config)
    };
    let assistant_text = if open.assistant_text.is_empty() {
        String::new()
    } else {
        redact_assistant_side(&open.assistant_text, config)
    };

    let mut exchange = Exchange {
        index: exchanges.len() + 1,
        user_text,
        assistant_text,
        user_line: open.user_line,
        assistant_line: open.assistant_line,
    };
    if exchange.combined_len() > config.exchange_hard_ceiling {
        // Unbounded downstream cost is worse than an explicit omission.
        exchange.user_text = OVERSIZED_TURN_STUB.to_string();
        exchange.assistant_text = OVERSIZED_TURN_STUB.to_string();
    }
    exchanges.push(exchange);
}
