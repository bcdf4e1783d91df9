use std::sync::LazyLock;

use regex::Regex;

use super::ExtractionError;

static RE_SCRIPT_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)\b.*?</(script|style)\s*>").unwrap());
static RE_BLOCK_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</(p|div|li|tr|h[1-6])\s*>|<br\s*/?>").unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

pub fn extract(bytes: &[u8]) -> Result<String, ExtractionError> {
    let text = String::from_utf8(bytes.to_vec())?;
    // Strip a UTF-8 BOM.
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Drops markup, keeping one line per block element.
pub fn extract_html(bytes: &[u8]) -> Result<String, ExtractionError> {
    let html = extract(bytes)?;
    let without_code = RE_SCRIPT_STYLE.replace_all(&html, "");
    let with_breaks = RE_BLOCK_END.replace_all(&without_code, "\n");
    let stripped = RE_TAG.replace_all(&with_breaks, "");
    let decoded = decode_entities(&stripped);

    let lines: Vec<String> = decoded
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect();
    Ok(lines.join("\n"))
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&pound;", "£")
        .replace("&amp;", "&")
}
