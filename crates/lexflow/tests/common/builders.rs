//! Builders for taxonomy packs and canned model output.

#![allow(dead_code)]

use serde_json::json;

use lexflow::model::ActionType;
use lexflow::taxonomy::{
    ActionTemplate, ActionTrigger, Category, ConditionValue, ConflictDetectionMode, DataType,
    DocumentType, FieldDef, PromptTemplates, ReconciliationRule, TaxonomyPack, TriggerOperator,
};

/// Fluent builder for [`TaxonomyPack`].
pub struct PackBuilder {
    pack: TaxonomyPack,
}

impl PackBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            pack: TaxonomyPack {
                id: id.to_string(),
                name: format!("{} pack", id),
                version: "1".to_string(),
                practice_area: None,
                categories: Vec::new(),
                document_types: Vec::new(),
                action_triggers: Vec::new(),
                reconciliation_rules: Vec::new(),
                prompt_templates: PromptTemplates::default(),
            },
        }
    }

    pub fn category(mut self, key: &str, label: &str) -> Self {
        self.pack.categories.push(Category {
            key: key.to_string(),
            label: label.to_string(),
            description: None,
            fields: Vec::new(),
        });
        self
    }

    /// Adds a field to an already declared category.
    pub fn field(mut self, category: &str, key: &str, label: &str, data_type: DataType) -> Self {
        let target = self
            .pack
            .categories
            .iter_mut()
            .find(|c| c.key == category)
            .unwrap_or_else(|| panic!("category '{}' not declared", category));
        target.fields.push(FieldDef {
            key: key.to_string(),
            label: label.to_string(),
            data_type,
            description: None,
            requires_human_review: false,
            impact: None,
            enum_values: Vec::new(),
        });
        self
    }

    pub fn document_type(mut self, key: &str, label: &str, categories: &[&str]) -> Self {
        self.pack.document_types.push(DocumentType {
            key: key.to_string(),
            label: label.to_string(),
            description: None,
            activated_categories: categories.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn trigger(
        mut self,
        id: &str,
        field_key: &str,
        operator: TriggerOperator,
        value: Option<ConditionValue>,
        action_type: ActionType,
        title: &str,
    ) -> Self {
        self.pack.action_triggers.push(ActionTrigger {
            id: id.to_string(),
            name: None,
            category_key: None,
            field_key: field_key.to_string(),
            operator,
            value,
            action: ActionTemplate {
                action_type,
                title: title.to_string(),
                description: None,
                priority: 2,
                payload: serde_json::Map::new(),
            },
        });
        self
    }

    /// Shorthand for an `exists` trigger creating a task.
    pub fn exists_trigger(self, id: &str, field_key: &str, title: &str) -> Self {
        self.trigger(
            id,
            field_key,
            TriggerOperator::Exists,
            None,
            ActionType::CreateTask,
            title,
        )
    }

    pub fn rule(mut self, field_key: &str, mode: ConflictDetectionMode) -> Self {
        self.pack.reconciliation_rules.push(ReconciliationRule {
            field_key: field_key.to_string(),
            conflict_detection_mode: mode,
            auto_apply_threshold: None,
            requires_human_review: false,
        });
        self
    }

    pub fn build(self) -> TaxonomyPack {
        self.pack
    }
}

/// A lease pack with one date field, a `lease` type activating it and an
/// `exists` trigger on the field.
pub fn lease_pack() -> TaxonomyPack {
    PackBuilder::new("property-v1")
        .category("dates", "Key dates")
        .field("dates", "completion_date", "Completion date", DataType::Date)
        .document_type("lease", "Lease", &["dates"])
        .exists_trigger("diary-completion", "completion_date", "Diary completion for {{value}}")
        .build()
}

/// Classifier reply.
pub fn classification(document_type: &str, confidence: f64) -> String {
    json!({ "documentType": document_type, "confidence": confidence }).to_string()
}

/// Extraction reply with one finding whose quote is the value itself.
pub fn finding(category: &str, field: &str, value: &str, confidence: f64) -> String {
    findings(&[(category, field, value, confidence)])
}

pub fn findings(items: &[(&str, &str, &str, f64)]) -> String {
    let list: Vec<_> = items
        .iter()
        .map(|(category, field, value, confidence)| {
            json!({
                "categoryKey": category,
                "fieldKey": field,
                "value": value,
                "sourceQuote": value,
                "confidence": confidence,
            })
        })
        .collect();
    json!({ "findings": list }).to_string()
}
