//! Helpers for sanitizing document text before it enters a prompt, and
//! values before they enter tracing fields.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Chat-template control tokens and role markers a document could use to
/// impersonate the prompt around it.
static RE_CONTROL_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)<\|[a-z_]+\|>|\[/?INST\]|<</?SYS>>|</?document>|^\s*(human|assistant|system)\s*:")
        .unwrap()
});

/// Makes untrusted document text safe to embed inside a prompt.
///
/// - removes chat control tokens and role markers at line starts
/// - drops control characters other than newline and tab
/// - neutralises code fences so the text cannot close a fenced block
pub fn sanitize_for_prompt(text: &str) -> String {
    let without_tokens = RE_CONTROL_TOKENS.replace_all(text, " ");
    without_tokens
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .replace("```", "'''")
}

/// First `max_chars` characters of `text`, never splitting a char.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Returns only the filename component of a storage path.
///
/// Safe for span fields: document paths often contain client names.
pub fn redact_path(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}
