//! Filter 2: packs exchanges into one bounded document.
//!
//! The most recent exchange is authoritative and always renders first;
//! remaining pinned exchanges follow, then older exchanges newest-to-oldest
//! until the character budget is reached, with at most one whole overflow
//! exchange so the document never ends mid-turn.

use crate::config::CompactionConfig;
use crate::pairing::Exchange;

pub const AUTHORITATIVE_HEADING: &str = "== CURRENT STATE (AUTHORITATIVE) ==";
pub const ACTIVE_THREAD_HEADING: &str = "== ACTIVE THREAD ==";
pub const REFERENCE_HEADING: &str = "== EARLIER CONTEXT (REFERENCE ONLY) ==";

/// Minimum residue, in characters, below which procedural stripping of the
/// authoritative exchange falls back to paragraph extraction.
const MIN_STRIPPED_RESIDUE_CHARS: usize = 40;

/// Packs the ordered (oldest-to-newest) exchange list into the compaction
/// document. Empty input yields an empty document.
pub fn pack_exchanges(exchanges: &[Exchange], config: &CompactionConfig) -> String {
    let Some(newest) = exchanges.last() else {
        return String::new();
    };
    let pin = config.pinned_exchanges.max(1).min(exchanges.len());
    let (older, pinned) = exchanges.split_at(exchanges.len() - pin);

    let mut document = String::new();
    document.push_str(AUTHORITATIVE_HEADING);
    document.push_str("\n\n");
    document.push_str(&format_authoritative_exchange(newest, config));

    let remaining_pinned = &pinned[..pinned.len() - 1];
    if !remaining_pinned.is_empty() {
        document.push_str(ACTIVE_THREAD_HEADING);
        document.push_str("\n\n");
        for exchange in remaining_pinned.iter().rev() {
            document.push_str(&format_exchange_block(exchange));
        }
    }

    if !older.is_empty() {
        document.push_str(REFERENCE_HEADING);
        document.push_str("\n\n");
        let mut total = document.chars().count();
        for exchange in older.iter().rev() {
            let block = format_exchange_block(exchange);
            let block_len = block.chars().count();
            if total + block_len <= config.pack_budget_chars {
                document.push_str(&block);
                total += block_len;
                continue;
            }
            // Budget crossed: one whole exchange may pass as overflow.
            if block_len <= config.overflow_exchange_cap {
                document.push_str(&block);
            }
            break;
        }
    }

    document.trim_end().to_string()
}

/// One exchange rendered as a reference block. Empty sides are omitted.
pub fn format_exchange_block(exchange: &Exchange) -> String {
    let mut block = format!("[Exchange {}]\n", exchange.index);
    if !exchange.user_text.is_empty() {
        block.push_str("User:\n");
        block.push_str(&exchange.user_text);
        block.push('\n');
    }
    if !exchange.assistant_text.is_empty() {
        block.push_str("Assistant:\n");
        block.push_str(&exchange.assistant_text);
        block.push('\n');
    }
    block.push('\n');
    block
}

/// Renders the most recent exchange under the authoritative heading, with
/// list-like/procedural assistant content stripped (anchor-tagged lines kept
/// verbatim) unless stripping leaves too little text.
fn format_authoritative_exchange(exchange: &Exchange, config: &CompactionConfig) -> String {
    let mut rendered = Exchange {
        assistant_text: strip_procedural_lines(&exchange.assistant_text, &config.anchor_marker),
        ..exchange.clone()
    };
    if rendered.assistant_text.trim().chars().count() < MIN_STRIPPED_RESIDUE_CHARS {
        rendered.assistant_text = extract_head_middle_tail(&exchange.assistant_text);
    }
    format_exchange_block(&rendered)
}

fn is_procedural_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with("- ")
        || trimmed.starts_with("* ")
        || trimmed.starts_with("> ")
        || trimmed.starts_with('#')
    {
        return true;
    }
    // Numbered list steps: `1.` / `12)` prefixes.
    let digits: String = trimmed.chars().take_while(|ch| ch.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    matches!(
        trimmed[digits.len()..].chars().next(),
        Some('.') | Some(')')
    )
}

/// Drops list-like/procedural lines, keeping anchor-tagged lines verbatim.
pub fn strip_procedural_lines(text: &str, anchor_marker: &str) -> String {
    text.lines()
        .filter(|line| {
            (!anchor_marker.is_empty() && line.contains(anchor_marker))
                || !is_procedural_line(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Fallback extraction: first, middle, and last paragraph of the turn.
pub fn extract_head_middle_tail(text: &str) -> String {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .collect();
    match paragraphs.len() {
        0 => String::new(),
        1..=3 => paragraphs.join("\n\n"),
        count => [paragraphs[0], paragraphs[count / 2], paragraphs[count - 1]].join("\n\n"),
    }
}
