use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::risk::RiskFactor;

/// A stored document as the pipeline sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub firm_id: String,
    pub matter_id: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub storage_bucket: String,
    pub storage_path: String,
    pub extracted_text: Option<String>,
}

impl DocumentRecord {
    /// The declared MIME type, or one guessed from the filename.
    pub fn effective_mime_type(&self) -> Option<String> {
        self.mime_type
            .as_deref()
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .or_else(|| {
                mime_guess::from_path(&self.filename)
                    .first()
                    .map(|m| m.essence_str().to_string())
            })
    }

    pub fn has_text(&self) -> bool {
        self.extracted_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

/// The slice of a matter the pipeline reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matter {
    pub id: String,
    pub firm_id: String,
    pub taxonomy_pack_id: Option<String>,
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub risk_factors: Vec<RiskFactor>,
    pub risk_updated_at: Option<DateTime<Utc>>,
}
