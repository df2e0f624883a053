//! Shared text and hashing helpers for the stageforge crate.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static LEADING_FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_-]*\s*").unwrap());

static TRAILING_FENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*```$").unwrap());

static NON_ALNUM_RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").unwrap());

/// Number of hex characters kept from a SHA-256 digest.
pub const HASH_HEX_LEN: usize = 24;

/// Extract a JSON object from text that may contain other content.
/// Uses brace-counting to find the outermost JSON object.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0;
    let mut end = start;

    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if depth == 0 && end > start {
        Some(text[start..end].to_string())
    } else {
        None
    }
}

/// Truncated SHA-256 hex digest used for content hashes and snapshot ids.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_HEX_LEN].to_string()
}

/// Character count (not bytes) of a string.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Keep at most `max_chars` characters from the start of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Keep at most `max_chars` characters from the end of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = char_len(text);
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Remove a surrounding Markdown code fence from model output.
pub fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !raw.starts_with("```") {
        return raw.to_string();
    }
    let without_open = LEADING_FENCE_REGEX.replace(raw, "");
    TRAILING_FENCE_REGEX
        .replace(&without_open, "")
        .trim()
        .to_string()
}

/// Normalize an identifier into an upper-case context token.
///
/// Runs of non-alphanumeric characters collapse into `_`, leading and
/// trailing underscores are dropped: `"ui-design"` becomes `UI_DESIGN`.
pub fn to_context_token(value: &str) -> String {
    NON_ALNUM_RUN_REGEX
        .replace_all(value.trim(), "_")
        .trim_matches('_')
        .to_uppercase()
}

/// Short lowercase alphanumeric suffix for generated identifiers.
pub fn random_suffix(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string()[..len].to_string()
}
