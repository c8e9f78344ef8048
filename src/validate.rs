//! Source-of-truth for every inbound bound and format check. Route handlers
//! and the gateway both call into here so REST and event payloads share one
//! contract.

use chrono::{DateTime, Duration, Utc};

/// Room keys: 6-50 chars of `[A-Za-z0-9_-]`, at least one ASCII letter and
/// one digit. Case-sensitive.
pub const ROOM_KEY_MIN: usize = 6;
pub const ROOM_KEY_MAX: usize = 50;

/// Display names: 1-50 chars, visible/printable plus CJK, no surrounding
/// whitespace.
pub const DISPLAY_NAME_MAX: usize = 50;

pub const MESSAGE_MAX_CHARS: usize = 50_000;
pub const MESSAGE_MAX_LINES: usize = 1_000;
pub const MESSAGE_MAX_LINE_CHARS: usize = 10_000;

pub const SANITIZED_FILENAME_MAX: usize = 100;
pub const FALLBACK_FILENAME: &str = "unnamed_file";

/// Clock-skew tolerance for client-declared file `lastModified` stamps.
pub const FILE_MTIME_SKEW_HOURS: i64 = 48;

/// Allowed share expirations, in days.
pub const SHARE_EXPIRY_DAYS: [i64; 5] = [1, 3, 7, 15, 30];

/// Extensions never accepted for upload regardless of declared MIME.
const DENIED_EXTENSIONS: [&str; 10] = [
    "exe", "bat", "cmd", "com", "scr", "pif", "msi", "vbs", "ps1", "dll",
];

pub fn valid_room_key(key: &str) -> bool {
    let len = key.chars().count();
    if !(ROOM_KEY_MIN..=ROOM_KEY_MAX).contains(&len) {
        return false;
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return false;
    }
    key.chars().any(|c| c.is_ascii_alphabetic()) && key.chars().any(|c| c.is_ascii_digit())
}

pub fn valid_display_name(name: &str) -> bool {
    if name.is_empty() || name.chars().count() > DISPLAY_NAME_MAX {
        return false;
    }
    if name.trim() != name {
        return false;
    }
    name.chars().all(is_display_name_char)
}

/// Visible printable ASCII, internal spaces, and the common CJK blocks
/// (unified ideographs, kana, fullwidth forms).
fn is_display_name_char(c: char) -> bool {
    c.is_ascii_graphic()
        || c == ' '
        || ('\u{4E00}'..='\u{9FFF}').contains(&c)
        || ('\u{3040}'..='\u{30FF}').contains(&c)
        || ('\u{FF00}'..='\u{FFEF}').contains(&c)
}

pub fn valid_message_content(content: &str) -> bool {
    let chars = content.chars().count();
    if chars == 0 || chars > MESSAGE_MAX_CHARS {
        return false;
    }
    let mut lines = 0usize;
    for line in content.split('\n') {
        lines += 1;
        if lines > MESSAGE_MAX_LINES || line.chars().count() > MESSAGE_MAX_LINE_CHARS {
            return false;
        }
    }
    true
}

pub fn valid_file_mtime(last_modified: DateTime<Utc>) -> bool {
    let skew = Duration::hours(FILE_MTIME_SKEW_HOURS);
    let now = Utc::now();
    last_modified > now - skew && last_modified < now + skew
}

pub fn valid_share_expiry_days(days: i64) -> bool {
    SHARE_EXPIRY_DAYS.contains(&days)
}

/// Share ids are the leading 10 base62 chars of a UUID; accept 8-10 so that
/// historic short ids keep resolving.
pub fn well_formed_share_id(id: &str) -> bool {
    (8..=10).contains(&id.len()) && id.chars().all(|c| c.is_ascii_alphanumeric())
}

pub fn denied_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| DENIED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sanitize a user-supplied filename for metadata and Content-Disposition.
/// The result is never used as an on-disk path component; blobs are stored
/// under their file id.
///
/// - path separators split the name; empty and all-dot segments are dropped,
///   the rest joined with `_`
/// - control characters and `< > : " | ? *` become `_`
/// - reserved Windows device names get a `_` prefix
/// - empty results fall back to `unnamed_file`
/// - capped at 100 chars, preserving the extension
pub fn sanitize_filename(raw: &str) -> String {
    let normalized = raw.replace('\\', "/");
    let joined = normalized
        .split('/')
        .filter(|seg| !seg.is_empty() && !seg.chars().all(|c| c == '.'))
        .collect::<Vec<_>>()
        .join("_");

    let mut cleaned: String = joined
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Windows also rejects trailing dots and spaces
    while cleaned.ends_with(['.', ' ']) {
        cleaned.pop();
    }

    if cleaned.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }

    if is_reserved_name(&cleaned) {
        cleaned.insert(0, '_');
    }

    truncate_keeping_extension(&cleaned, SANITIZED_FILENAME_MAX)
}

fn is_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name);
    let upper = stem.to_ascii_uppercase();
    matches!(upper.as_str(), "CON" | "PRN" | "AUX" | "NUL")
        || (upper.len() == 4
            && (upper.starts_with("COM") || upper.starts_with("LPT"))
            && upper[3..].chars().all(|c| c.is_ascii_digit() && c != '0'))
}

fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.chars().count() < max => {
            let keep = max - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{stem}.{ext}")
        }
        _ => name.chars().take(max).collect(),
    }
}
