//! Taxonomy pack definitions.
//!
//! A pack is a practice-area schema: categories of fields to extract,
//! document types that activate categories, deterministic action triggers,
//! per-field reconciliation rules and optional prompt templates.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::TaxonomyError;
use crate::model::finding::qualified_key;
use crate::model::{ActionType, Impact};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyPack {
    pub id: String,
    pub name: String,
    #[serde(default = "default_pack_version")]
    pub version: String,
    #[serde(default)]
    pub practice_area: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub document_types: Vec<DocumentType>,
    #[serde(default)]
    pub action_triggers: Vec<ActionTrigger>,
    #[serde(default)]
    pub reconciliation_rules: Vec<ReconciliationRule>,
    #[serde(default)]
    pub prompt_templates: PromptTemplates,
}

fn default_pack_version() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Date,
    Currency,
    Number,
    Percentage,
    Boolean,
    Enum,
    Party,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Date => "date",
            DataType::Currency => "currency",
            DataType::Number => "number",
            DataType::Percentage => "percentage",
            DataType::Boolean => "boolean",
            DataType::Enum => "enum",
            DataType::Party => "party",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub key: String,
    pub label: String,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requires_human_review: bool,
    /// Overrides the impact derived from the data type.
    #[serde(default)]
    pub impact: Option<Impact>,
    #[serde(default)]
    pub enum_values: Vec<String>,
}

fn default_data_type() -> DataType {
    DataType::Text
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentType {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Category keys extracted for documents of this type.
    #[serde(default)]
    pub activated_categories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOperator {
    Exists,
    Equals,
    Contains,
    Gt,
    Lt,
    DateWithinDays,
}

/// Comparison operand of a trigger; packs may write numbers or strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    Text(String),
}

impl ConditionValue {
    pub fn as_text(&self) -> String {
        match self {
            ConditionValue::Number(n) => n.to_string(),
            ConditionValue::Text(s) => s.clone(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ConditionValue::Number(n) => Some(*n),
            ConditionValue::Text(s) => crate::reconcile::parse_number(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTemplate {
    pub action_type: ActionType,
    /// May contain `{{value}}`, `{{label}}`, `{{field}}` and `{{category}}`.
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

fn default_priority() -> i64 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTrigger {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// When set, only `category:field` matches; otherwise the bare field key.
    #[serde(default)]
    pub category_key: Option<String>,
    pub field_key: String,
    pub operator: TriggerOperator,
    #[serde(default)]
    pub value: Option<ConditionValue>,
    pub action: ActionTemplate,
}

impl ActionTrigger {
    /// Key looked up in the finding index.
    pub fn lookup_key(&self) -> String {
        match &self.category_key {
            Some(category) => qualified_key(category, &self.field_key),
            None => self.field_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDetectionMode {
    Exact,
    #[default]
    FuzzyText,
    FuzzyNumber,
    DateRange,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRule {
    pub field_key: String,
    #[serde(default)]
    pub conflict_detection_mode: ConflictDetectionMode,
    #[serde(default)]
    pub auto_apply_threshold: Option<f64>,
    #[serde(default)]
    pub requires_human_review: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplates {
    /// Extra instructions for the classifier.
    #[serde(default)]
    pub classification: Option<String>,
    /// Extra instructions for field extraction.
    #[serde(default)]
    pub extraction: Option<String>,
}

impl TaxonomyPack {
    /// Checks internal references: unique keys, known categories and fields,
    /// thresholds within 0..=1.
    pub fn validate(&self) -> Result<(), TaxonomyError> {
        let invalid = |message: String| TaxonomyError::InvalidPack {
            id: self.id.clone(),
            message,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("pack id is empty".to_string()));
        }

        let mut category_keys = HashSet::new();
        let mut field_keys = HashSet::new();
        let mut qualified = HashSet::new();
        for category in &self.categories {
            if !category_keys.insert(category.key.as_str()) {
                return Err(invalid(format!("duplicate category '{}'", category.key)));
            }
            for field in &category.fields {
                if !qualified.insert(qualified_key(&category.key, &field.key)) {
                    return Err(invalid(format!(
                        "duplicate field '{}' in category '{}'",
                        field.key, category.key
                    )));
                }
                field_keys.insert(field.key.as_str());
            }
        }

        for doc_type in &self.document_types {
            if let Some(missing) = doc_type
                .activated_categories
                .iter()
                .find(|c| !category_keys.contains(c.as_str()))
            {
                return Err(invalid(format!(
                    "document type '{}' activates unknown category '{}'",
                    doc_type.key, missing
                )));
            }
        }

        let mut trigger_ids = HashSet::new();
        for trigger in &self.action_triggers {
            if !trigger_ids.insert(trigger.id.as_str()) {
                return Err(invalid(format!("duplicate trigger '{}'", trigger.id)));
            }
            let known = match &trigger.category_key {
                Some(category) => qualified.contains(&qualified_key(category, &trigger.field_key)),
                None => field_keys.contains(trigger.field_key.as_str()),
            };
            if !known {
                return Err(invalid(format!(
                    "trigger '{}' references unknown field '{}'",
                    trigger.id,
                    trigger.lookup_key()
                )));
            }
            let needs_value = !matches!(trigger.operator, TriggerOperator::Exists);
            if needs_value && trigger.value.is_none() {
                return Err(invalid(format!(
                    "trigger '{}' needs a value for its operator",
                    trigger.id
                )));
            }
        }

        for rule in &self.reconciliation_rules {
            if let Some(threshold) = rule.auto_apply_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(invalid(format!(
                        "rule for '{}' has threshold {} outside 0..=1",
                        rule.field_key, threshold
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Field definition together with the category that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub category_key: String,
    pub category_label: String,
    pub field: FieldDef,
}

/// A validated pack with its lookup tables built.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPack {
    pub pack: TaxonomyPack,
    /// Reconciliation rules keyed by field key.
    pub rule_map: HashMap<String, ReconciliationRule>,
    /// Fields keyed by `category:field`.
    pub field_map: HashMap<String, FieldEntry>,
}

impl LoadedPack {
    pub fn new(pack: TaxonomyPack) -> Result<Self, TaxonomyError> {
        pack.validate()?;
        let rule_map = pack
            .reconciliation_rules
            .iter()
            .map(|r| (r.field_key.clone(), r.clone()))
            .collect();
        let field_map = pack
            .categories
            .iter()
            .flat_map(|c| {
                c.fields.iter().map(move |f| {
                    (
                        qualified_key(&c.key, &f.key),
                        FieldEntry {
                            category_key: c.key.clone(),
                            category_label: c.label.clone(),
                            field: f.clone(),
                        },
                    )
                })
            })
            .collect();
        Ok(Self {
            pack,
            rule_map,
            field_map,
        })
    }

    pub fn id(&self) -> &str {
        &self.pack.id
    }

    pub fn document_types(&self) -> &[DocumentType] {
        &self.pack.document_types
    }

    pub fn triggers(&self) -> &[ActionTrigger] {
        &self.pack.action_triggers
    }

    pub fn prompt_templates(&self) -> &PromptTemplates {
        &self.pack.prompt_templates
    }

    pub fn rule_for(&self, field_key: &str) -> Option<&ReconciliationRule> {
        self.rule_map.get(field_key)
    }

    pub fn field(&self, category_key: &str, field_key: &str) -> Option<&FieldEntry> {
        self.field_map.get(&qualified_key(category_key, field_key))
    }

    /// Categories to extract for a classified document type.
    ///
    /// Unclassified documents, and types the pack does not know, get every
    /// category. A known type gets exactly the categories it activates.
    pub fn active_categories(&self, doc_type: Option<&str>) -> Vec<&Category> {
        let activated = doc_type.and_then(|key| {
            self.pack
                .document_types
                .iter()
                .find(|dt| dt.key == key)
                .map(|dt| &dt.activated_categories)
        });
        match activated {
            Some(keys) => self
                .pack
                .categories
                .iter()
                .filter(|c| keys.iter().any(|k| k == &c.key))
                .collect(),
            None => self.pack.categories.iter().collect(),
        }
    }
}
