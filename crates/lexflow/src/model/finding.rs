use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    /// How much a finding matters to the matter it belongs to.
    pub enum Impact {
        Critical => "critical",
        High => "high",
        Medium => "medium",
        Low => "low",
        Info => "info",
    }
}

string_enum! {
    /// Review state of a finding.
    pub enum FindingStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
        AutoApplied => "auto_applied",
        Conflict => "conflict",
    }
}

impl FindingStatus {
    /// Statuses whose value counts as established matter data.
    pub fn is_established(&self) -> bool {
        matches!(self, FindingStatus::Accepted | FindingStatus::AutoApplied)
    }
}

/// One extracted `(category, field, value)` fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineFinding {
    pub id: String,
    pub run_id: String,
    pub matter_id: String,
    pub document_id: String,
    pub category_key: String,
    pub field_key: String,
    pub label: String,
    pub value: String,
    pub source_quote: Option<String>,
    pub page_number: Option<i64>,
    pub char_start: Option<i64>,
    pub char_end: Option<i64>,
    pub confidence: f64,
    pub impact: Impact,
    pub status: FindingStatus,
    pub existing_value: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PipelineFinding {
    /// `category:field` key used for reconciliation and trigger lookup.
    pub fn qualified_key(&self) -> String {
        qualified_key(&self.category_key, &self.field_key)
    }
}

pub fn qualified_key(category_key: &str, field_key: &str) -> String {
    format!("{}:{}", category_key, field_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(FindingStatus::AutoApplied.as_str(), "auto_applied");
        assert_eq!(
            "conflict".parse::<FindingStatus>().unwrap(),
            FindingStatus::Conflict
        );
        assert!(FindingStatus::Accepted.is_established());
        assert!(FindingStatus::AutoApplied.is_established());
        assert!(!FindingStatus::Pending.is_established());
        assert!(!FindingStatus::Conflict.is_established());
    }

    #[test]
    fn test_impact_serde_is_lowercase() {
        let json = serde_json::to_string(&Impact::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn test_qualified_key() {
        assert_eq!(qualified_key("dates", "closing_date"), "dates:closing_date");
    }
}
