//! Final mechanical formatting pass over the packed document.
//!
//! Pure formatting: normalizes newlines, guarantees a paragraph break before
//! role headers, collapses excess blank lines, and prepends the configured
//! preamble plus a small session header. Introduces no content decisions.

const ROLE_HEADERS: &[&str] = &["User:", "Assistant:"];

/// Assembles the deliverable essence text.
pub fn assemble_essence(packed: &str, session_id: &str, mode: &str, preamble: &str) -> String {
    let normalized = packed.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    for line in normalized.lines() {
        let is_role_header = ROLE_HEADERS.contains(&line.trim());
        let previous_blank = lines
            .last()
            .map(|previous| previous.trim().is_empty())
            .unwrap_or(true);
        if is_role_header && !previous_blank {
            lines.push(String::new());
        }
        lines.push(line.to_string());
    }

    // Collapse runs of 3+ blank lines to 2.
    let mut collapsed: Vec<String> = Vec::new();
    let mut blank_run = 0usize;
    for line in lines {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                collapsed.push(String::new());
            }
        } else {
            blank_run = 0;
            collapsed.push(line);
        }
    }
    let body = collapsed.join("\n");

    let header = format!("[session: {}] [mode: {}]", session_id.trim(), mode.trim());
    let mut essence = String::new();
    let preamble = preamble.trim();
    if !preamble.is_empty() {
        essence.push_str(preamble);
        essence.push_str("\n\n");
    }
    essence.push_str(&header);
    essence.push_str("\n\n");
    essence.push_str(&body);
    essence.trim().to_string()
}
