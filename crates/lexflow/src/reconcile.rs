//! Reconciliation of newly extracted values against established matter data.
//!
//! Everything here is pure: the reconcile worker feeds it the finding, the
//! latest established value and the field's rule, and persists the result.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

use crate::model::FindingStatus;
use crate::taxonomy::{ConflictDetectionMode, ReconciliationRule};

/// Threshold used when neither the rule nor the settings provide one.
pub const DEFAULT_AUTO_APPLY_THRESHOLD: f64 = 0.85;

/// Relative tolerance for `fuzzy_number` comparisons.
const NUMBER_TOLERANCE: f64 = 0.01;

/// Result of reconciling one finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub status: FindingStatus,
    /// Established value the finding was compared against, if any.
    pub existing_value: Option<String>,
}

impl Reconciliation {
    /// Whether the pipeline itself settled the finding.
    pub fn is_resolved(&self) -> bool {
        self.status != FindingStatus::Pending
    }
}

/// Decides the status of a pending finding.
///
/// Without an established value the finding is auto-applied when the rule
/// allows it and confidence reaches the threshold. With one, the values are
/// compared under the rule's mode: a match confirms (`auto_applied`), a
/// mismatch is a `conflict`.
pub fn reconcile(
    value: &str,
    existing: Option<&str>,
    confidence: f64,
    rule: Option<&ReconciliationRule>,
    default_threshold: f64,
) -> Reconciliation {
    match existing {
        None => {
            let review_required = rule.is_some_and(|r| r.requires_human_review);
            let threshold = rule
                .and_then(|r| r.auto_apply_threshold)
                .unwrap_or(default_threshold);
            let status = if !review_required && confidence >= threshold {
                FindingStatus::AutoApplied
            } else {
                FindingStatus::Pending
            };
            Reconciliation {
                status,
                existing_value: None,
            }
        }
        Some(existing) => {
            let mode = rule.map(|r| r.conflict_detection_mode).unwrap_or_default();
            let status = if values_match(mode, value, existing) {
                FindingStatus::AutoApplied
            } else {
                FindingStatus::Conflict
            };
            Reconciliation {
                status,
                existing_value: Some(existing.to_string()),
            }
        }
    }
}

/// Compares two values under a conflict detection mode.
///
/// Numeric and date modes fall back to text comparison when either side
/// does not parse.
pub fn values_match(mode: ConflictDetectionMode, a: &str, b: &str) -> bool {
    match mode {
        ConflictDetectionMode::Exact => a.trim() == b.trim(),
        ConflictDetectionMode::FuzzyText | ConflictDetectionMode::Semantic => {
            normalize_text(a) == normalize_text(b)
        }
        ConflictDetectionMode::FuzzyNumber => match (parse_number(a), parse_number(b)) {
            (Some(x), Some(y)) => numbers_close(x, y),
            _ => normalize_text(a) == normalize_text(b),
        },
        ConflictDetectionMode::DateRange => match (parse_date(a), parse_date(b)) {
            (Some(x), Some(y)) => x == y,
            _ => normalize_text(a) == normalize_text(b),
        },
    }
}

fn numbers_close(x: f64, y: f64) -> bool {
    let magnitude = x.abs().max(y.abs());
    if magnitude == 0.0 {
        return true;
    }
    (x - y).abs() <= magnitude * NUMBER_TOLERANCE
}

/// Lowercases, drops punctuation and symbols, and collapses whitespace.
pub fn normalize_text(s: &str) -> String {
    let kept: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

static RE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").unwrap());

/// Parses the first number in `s`, allowing currency symbols, codes, percent
/// signs and thousands separators: `"£1,200.50"`, `"USD 3,000"`, `"12.5%"`.
/// Later numbers are ignored, so `"between 5 and 10"` is 5.
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    let negative = trimmed.starts_with('-') || (trimmed.starts_with('(') && trimmed.ends_with(')'));
    let token = RE_NUMBER.find(trimmed)?;
    // "1.2.3" is a version or a date, not a number.
    let mut rest = trimmed[token.end()..].chars();
    if rest.next() == Some('.') && rest.next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    let value: f64 = token.as_str().replace(',', "").parse().ok()?;
    Some(if negative { -value } else { value })
}

static RE_ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").unwrap());

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%d-%m-%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// Parses a calendar date. Timestamps are reduced to their UTC day.
///
/// Numeric day/month forms are read day-first.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    let cleaned = RE_ORDINAL.replace_all(trimmed, "$1");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        .or_else(|| {
            // Leading date of a longer timestamp such as "2024-06-01 09:00".
            cleaned
                .get(..10)
                .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
        })
}
