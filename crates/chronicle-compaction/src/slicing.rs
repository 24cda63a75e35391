//! Deterministic per-turn-side slicing and redaction rules.
//!
//! Content-preserving by default: noise is stripped, duplicate-paste stutter
//! collapsed, and only text over budget is sliced. Every function here is
//! idempotent on already-short text and never splits inside a multi-byte
//! character or mid-word.

use crate::config::CompactionConfig;

/// Marker substituted for a fenced code block.
pub fn codeblock_stub(lines: usize) -> String {
    format!("[CODEBLOCK OMITTED ({lines} lines)]")
}

/// Marker substituted for a known large pasted preamble paragraph.
pub const PASTED_PREAMBLE_STUB: &str = "[PASTED PREAMBLE OMITTED]";

/// Marker substituted for both sides of an exchange over the hard ceiling.
pub const OVERSIZED_TURN_STUB: &str = "[TURN OMITTED (OVERSIZED)]";

/// Gap marker joining slice windows.
pub const SLICE_GAP: &str = "[...]";

/// Leading paragraph prefixes recognized as large pasted preambles.
const KNOWN_PASTED_PREAMBLE_PREFIXES: &[&str] = &[
    "You are ChatGPT",
    "You are a helpful assistant",
    "SYSTEM PROMPT:",
    "Knowledge cutoff:",
];

/// Attachment filename/descriptor prefixes stripped from a turn head.
const ATTACHMENT_DESCRIPTOR_PREFIXES: &[&str] =
    &["Pasted image", "Attached file:", "Uploaded file:", "File:"];

/// How far past the per-half budget a slice may run to reach a sentence end.
const SENTENCE_OVERFLOW_CHARS: usize = 120;

const CODE_FENCE: &str = "```";

fn is_sentence_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '\n')
}

/// Detects `Page <n> of <m>` pagination artifacts left by paged captures.
fn is_page_counter_line(line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    matches!(
        tokens.as_slice(),
        ["Page", current, "of", total]
            if current.chars().all(|ch| ch.is_ascii_digit())
                && total.chars().all(|ch| ch.is_ascii_digit())
    )
}

/// Rule 1: strips the narrow class of known noise.
///
/// Fenced code blocks become a fixed stub, pagination artifacts and leading
/// attachment descriptor lines are dropped, known pasted preambles are
/// replaced with a stub, and runs of 3+ blank lines collapse to 2.
pub fn strip_noise(text: &str) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut fence_open = false;
    let mut fence_lines = 0usize;
    let mut blank_run = 0usize;
    let mut previous_kept: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(CODE_FENCE) {
            if fence_open {
                kept.push(codeblock_stub(fence_lines));
                previous_kept = None;
                fence_lines = 0;
            }
            fence_open = !fence_open;
            blank_run = 0;
            continue;
        }
        if fence_open {
            fence_lines += 1;
            continue;
        }
        if is_page_counter_line(trimmed) {
            continue;
        }
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                kept.push(String::new());
            }
            continue;
        }
        blank_run = 0;
        // Duplicated short marker artifacts arrive as repeated identical lines.
        if trimmed.chars().count() < 80 && previous_kept.as_deref() == Some(trimmed) {
            continue;
        }
        previous_kept = Some(trimmed.to_string());
        kept.push(line.to_string());
    }
    if fence_open {
        // Unterminated fence: everything after it was code.
        kept.push(codeblock_stub(fence_lines));
    }

    // Leading attachment filename/descriptor lines.
    while let Some(first) = kept.first() {
        let trimmed = first.trim();
        if !trimmed.is_empty()
            && ATTACHMENT_DESCRIPTOR_PREFIXES
                .iter()
                .any(|prefix| trimmed.starts_with(prefix))
        {
            kept.remove(0);
        } else {
            break;
        }
    }

    let cleaned = kept.join("\n");
    replace_pasted_preambles(cleaned.trim())
}

fn replace_pasted_preambles(text: &str) -> String {
    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut replaced: Vec<String> = Vec::with_capacity(paragraphs.len());
    for paragraph in paragraphs {
        let is_preamble = KNOWN_PASTED_PREAMBLE_PREFIXES
            .iter()
            .any(|prefix| paragraph.trim_start().starts_with(prefix));
        if is_preamble {
            replaced.push(PASTED_PREAMBLE_STUB.to_string());
        } else {
            replaced.push(paragraph.to_string());
        }
    }
    replaced.join("\n\n")
}

/// Rule 2: collapses immediately repeated paragraph blocks (duplicate-paste
/// stutter), keeping the first occurrence.
pub fn collapse_repeated_paragraphs(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for paragraph in text.split("\n\n") {
        if kept
            .last()
            .map(|previous| previous.trim() == paragraph.trim())
            .unwrap_or(false)
        {
            continue;
        }
        kept.push(paragraph);
    }
    kept.join("\n\n")
}

/// Head+tail window slice under a character budget.
///
/// Each half is extended to the next sentence terminator within a bounded
/// overflow, then snapped outward to a word boundary. Overlapping windows
/// return the text unsliced rather than duplicating content.
pub fn head_tail_slice(text: &str, budget: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= budget {
        return text.to_string();
    }
    let half = budget / 2;

    let mut head_end = half.min(chars.len());
    let head_limit = (head_end + SENTENCE_OVERFLOW_CHARS).min(chars.len());
    if let Some(pos) = (head_end..head_limit).find(|&i| is_sentence_terminator(chars[i])) {
        head_end = pos + 1;
    }
    while head_end < chars.len() && !chars[head_end].is_whitespace() {
        head_end += 1;
    }

    let mut tail_start = chars.len().saturating_sub(half);
    let tail_limit = tail_start.saturating_sub(SENTENCE_OVERFLOW_CHARS);
    if let Some(pos) = (tail_limit..tail_start)
        .rev()
        .find(|&i| is_sentence_terminator(chars[i]))
    {
        tail_start = pos + 1;
    }
    while tail_start > 0 && !chars[tail_start - 1].is_whitespace() {
        tail_start -= 1;
    }

    if head_end >= tail_start {
        return text.to_string();
    }

    let head: String = chars[..head_end].iter().collect();
    let tail: String = chars[tail_start..].iter().collect();
    format!(
        "{}\n\n{SLICE_GAP}\n\n{}",
        head.trim_end(),
        tail.trim_start()
    )
}

/// Anchor-aware slice for assistant turns.
///
/// One to four anchor marker tokens: slice a window around the *last* marker,
/// the most likely conversational anchor. More than four markers usually
/// means meta-discussion about the marker itself, so fall back to head+tail.
pub fn anchor_window_slice(text: &str, marker: &str, budget: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= budget {
        return text.to_string();
    }
    let marker_count = if marker.is_empty() {
        0
    } else {
        text.matches(marker).count()
    };
    if marker_count == 0 || marker_count > 4 {
        return head_tail_slice(text, budget);
    }

    let marker_byte = match text.rfind(marker) {
        Some(byte) => byte,
        None => return head_tail_slice(text, budget),
    };
    let marker_pos = text[..marker_byte].chars().count();
    let marker_len = marker.chars().count();
    let half = budget / 2;

    let mut start = marker_pos.saturating_sub(half);
    while start > 0 && !chars[start - 1].is_whitespace() {
        start -= 1;
    }
    let mut end = (marker_pos + marker_len + half).min(chars.len());
    while end < chars.len() && !chars[end].is_whitespace() {
        end += 1;
    }

    let window: String = chars[start..end].iter().collect();
    let mut sliced = String::new();
    if start > 0 {
        sliced.push_str(SLICE_GAP);
        sliced.push_str("\n\n");
    }
    sliced.push_str(window.trim());
    if end < chars.len() {
        sliced.push_str("\n\n");
        sliced.push_str(SLICE_GAP);
    }
    sliced
}

/// Full redaction pass for the user side of an exchange.
pub fn redact_user_side(text: &str, config: &CompactionConfig) -> String {
    let cleaned = collapse_repeated_paragraphs(&strip_noise(text));
    head_tail_slice(&cleaned, config.side_slice_budget)
}

/// Full redaction pass for the assistant side of an exchange.
pub fn redact_assistant_side(text: &str, config: &CompactionConfig) -> String {
    let cleaned = collapse_repeated_paragraphs(&strip_noise(text));
    anchor_window_slice(&cleaned, &config.anchor_marker, config.side_slice_budget)
}
