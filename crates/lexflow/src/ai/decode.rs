//! Typed decoding of LLM JSON answers.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response is empty")]
    Empty,

    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Removes a surrounding Markdown code fence, if any.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_value(content: &str) -> Result<Value, DecodeError> {
    let body = strip_code_fences(content);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_str(body)?)
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn number_field(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub document_type: String,
    /// Clamped to `0.0..=1.0`.
    pub confidence: f64,
}

/// Decodes `{"documentType": "...", "confidence": 0.9}`.
pub fn decode_classification(content: &str) -> Result<ClassificationResult, DecodeError> {
    let value = parse_value(content)?;
    let Value::Object(map) = value else {
        return Err(DecodeError::Shape("expected a JSON object".into()));
    };
    let document_type = string_field(&map, &["documentType", "document_type"])
        .ok_or_else(|| DecodeError::Shape("missing documentType".into()))?;
    let confidence = number_field(&map, &["confidence"])
        .ok_or_else(|| DecodeError::Shape("missing confidence".into()))?;
    Ok(ClassificationResult {
        document_type,
        confidence: clamp_unit(confidence),
    })
}

/// One finding as the model reported it, before dedup and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFinding {
    pub category_key: String,
    pub field_key: String,
    pub value: String,
    pub source_quote: Option<String>,
    pub page_number: Option<i64>,
    pub confidence: f64,
}

/// Confidence assumed when the model omits one.
const DEFAULT_FINDING_CONFIDENCE: f64 = 0.5;

/// Decodes either a bare array of findings or `{"findings": [...]}`.
///
/// Entries missing a category, field or value are dropped; only a wrong
/// top-level shape is an error.
pub fn decode_findings(content: &str) -> Result<Vec<RawFinding>, DecodeError> {
    let entries = match parse_value(content)? {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("findings") {
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(DecodeError::Shape("`findings` is not an array".into())),
            None => return Err(DecodeError::Shape("missing `findings` array".into())),
        },
        _ => return Err(DecodeError::Shape("expected an array or object".into())),
    };

    let total = entries.len();
    let findings: Vec<RawFinding> = entries.iter().filter_map(decode_finding).collect();
    if findings.len() < total {
        tracing::debug!(
            dropped = total - findings.len(),
            "Discarded malformed finding entries"
        );
    }
    Ok(findings)
}

fn decode_finding(entry: &Value) -> Option<RawFinding> {
    let map = entry.as_object()?;
    Some(RawFinding {
        category_key: string_field(map, &["categoryKey", "category_key", "category"])?,
        field_key: string_field(map, &["fieldKey", "field_key", "field"])?,
        value: string_field(map, &["value"])?,
        source_quote: string_field(map, &["sourceQuote", "source_quote", "quote"]),
        page_number: number_field(map, &["pageNumber", "page_number", "page"])
            .filter(|p| p.is_finite() && *p >= 1.0)
            .map(|p| p as i64),
        confidence: clamp_unit(
            number_field(map, &["confidence"]).unwrap_or(DEFAULT_FINDING_CONFIDENCE),
        ),
    })
}
