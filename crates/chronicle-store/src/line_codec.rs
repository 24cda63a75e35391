//! One-record-per-line codec for the Truth log.
//!
//! A record is a single physical line `<R>|<payload>` where `<R>` is `U` or
//! `A` and the payload has literal newlines escaped to the two-character
//! sequence `\n` so one message always occupies exactly one line.

pub const RECORD_SEPARATOR: char = '|';

/// Substrings injected by chat UI chrome that are stripped before storage.
/// Each entry matches a full line of the raw capture.
pub const KNOWN_CHROME_LINES: &[&str] = &["Copy code", "Copy Code", "Copied!", "Edit"];

/// Attachment-type labels the capture surface prepends to pasted content.
pub const KNOWN_ATTACHMENT_LABELS: &[&str] = &["Pasted image", "Attached file:", "Uploaded file:"];

/// Speaker-name prefixes the capture surface prepends to a turn.
pub const KNOWN_SPEAKER_PREFIXES: &[&str] = &["You said:", "Assistant said:", "ChatGPT said:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Enumerates supported `Role` values for a transcript record.
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// One-character tag used on disk.
    pub fn tag(self) -> char {
        match self {
            Role::User => 'U',
            Role::Assistant => 'A',
        }
    }

    /// Strict decoding of an on-disk role tag. Unrecognized tags reject the line.
    pub fn from_line_tag(tag: char) -> Option<Role> {
        match tag.to_ascii_uppercase() {
            'U' => Some(Role::User),
            'A' => Some(Role::Assistant),
            _ => None,
        }
    }

    /// Inbound capture contract: anything other than the assistant tag is
    /// treated as user-authored.
    pub fn from_capture_tag(tag: char) -> Role {
        if tag.to_ascii_uppercase() == 'A' {
            Role::Assistant
        } else {
            Role::User
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// Escapes a payload so it occupies exactly one physical line.
///
/// CR/LF and lone CR are normalized to LF first, then LF becomes `\` + `n`.
pub fn escape_payload(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\\n")
}

/// Inverse of [`escape_payload`].
pub fn unescape_payload(payload: &str) -> String {
    payload.replace("\\n", "\n")
}

/// Encodes one record as a physical line without the terminating newline.
pub fn encode_line(role: Role, payload: &str) -> String {
    format!("{}{}{}", role.tag(), RECORD_SEPARATOR, payload)
}

/// Decodes one physical line into `(role, raw payload)`.
///
/// The second character must be the separator and the first a recognized role
/// tag (case-insensitive); any other shape is rejected rather than raised.
pub fn decode_line(line: &str) -> Option<(Role, &str)> {
    let mut chars = line.char_indices();
    let (_, tag) = chars.next()?;
    let (sep_index, separator) = chars.next()?;
    if separator != RECORD_SEPARATOR {
        return None;
    }
    let role = Role::from_line_tag(tag)?;
    let payload_start = sep_index + separator.len_utf8();
    Some((role, &line[payload_start..]))
}

/// Strips known UI chrome from a raw captured turn: a leading speaker
/// prefix, full-line chrome affordances, and leading attachment labels.
///
/// The capture surface layers the speaker prefix outermost, so it is removed
/// first; attachment labels it covered then sit at the head of the turn.
pub fn strip_chrome(text: &str) -> String {
    let mut text = text.trim_start();
    for prefix in KNOWN_SPEAKER_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start();
            break;
        }
    }

    let mut lines: Vec<&str> = text
        .lines()
        .filter(|line| !KNOWN_CHROME_LINES.contains(&line.trim()))
        .collect();

    while let Some(first) = lines.first() {
        let trimmed = first.trim();
        let is_attachment = KNOWN_ATTACHMENT_LABELS
            .iter()
            .any(|label| trimmed.starts_with(label));
        if is_attachment {
            lines.remove(0);
        } else {
            break;
        }
    }

    lines.join("\n").trim().to_string()
}

/// Normalizes a raw captured turn into a storable single-line payload:
/// chrome stripped, trimmed, newlines escaped. Empty result means the turn
/// carried no substantive content.
pub fn normalize_payload(raw_text: &str) -> String {
    escape_payload(strip_chrome(raw_text).trim())
}
