//! Deterministic action triggers.
//!
//! Each trigger fires at most once per run, on the first finding (in
//! extraction order) whose value satisfies its condition.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::model::{ActionType, PipelineAction, PipelineFinding};
use crate::reconcile::{parse_date, parse_number};
use crate::taxonomy::{ActionTrigger, ConditionValue, TriggerOperator};

/// Findings of one run keyed by `category:field` and by bare field key.
pub struct FindingIndex<'a> {
    by_key: HashMap<String, Vec<&'a PipelineFinding>>,
}

impl<'a> FindingIndex<'a> {
    pub fn new(findings: &'a [PipelineFinding]) -> Self {
        let mut by_key: HashMap<String, Vec<&'a PipelineFinding>> = HashMap::new();
        for finding in findings {
            by_key
                .entry(finding.qualified_key())
                .or_default()
                .push(finding);
            by_key
                .entry(finding.field_key.clone())
                .or_default()
                .push(finding);
        }
        Self { by_key }
    }

    pub fn get(&self, key: &str) -> &[&'a PipelineFinding] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Whether `value` satisfies `operator` against `operand`.
pub fn condition_holds(
    operator: TriggerOperator,
    operand: Option<&ConditionValue>,
    value: &str,
    today: NaiveDate,
) -> bool {
    match operator {
        TriggerOperator::Exists => !value.trim().is_empty(),
        TriggerOperator::Equals => {
            operand.is_some_and(|o| value.trim() == o.as_text().trim())
        }
        TriggerOperator::Contains => operand.is_some_and(|o| {
            value
                .to_lowercase()
                .contains(&o.as_text().to_lowercase())
        }),
        TriggerOperator::Gt | TriggerOperator::Lt => {
            let (Some(lhs), Some(rhs)) = (parse_number(value), operand.and_then(ConditionValue::as_number))
            else {
                return false;
            };
            if operator == TriggerOperator::Gt {
                lhs > rhs
            } else {
                lhs < rhs
            }
        }
        TriggerOperator::DateWithinDays => {
            let (Some(date), Some(days)) = (parse_date(value), operand.and_then(ConditionValue::as_number))
            else {
                return false;
            };
            let until = (date - today).num_days();
            until >= 0 && (until as f64) <= days
        }
    }
}

/// First finding that satisfies `trigger`, if any.
pub fn first_match<'a>(
    trigger: &ActionTrigger,
    index: &FindingIndex<'a>,
    today: NaiveDate,
) -> Option<&'a PipelineFinding> {
    index
        .get(&trigger.lookup_key())
        .iter()
        .copied()
        .find(|f| condition_holds(trigger.operator, trigger.value.as_ref(), &f.value, today))
}

fn render(template: &str, finding: &PipelineFinding) -> String {
    template
        .replace("{{value}}", &finding.value)
        .replace("{{label}}", &finding.label)
        .replace("{{field}}", &finding.field_key)
        .replace("{{category}}", &finding.category_key)
}

/// Builds the action a trigger produces for the finding it matched.
pub fn materialize(
    trigger: &ActionTrigger,
    finding: &PipelineFinding,
    run_id: &str,
    matter_id: &str,
) -> PipelineAction {
    let template = &trigger.action;
    let mut action = PipelineAction::new(
        run_id,
        matter_id,
        template.action_type,
        render(&template.title, finding),
        template.priority,
    );
    action.description = template
        .description
        .as_deref()
        .map(|d| render(d, finding));
    action.trigger_finding_id = Some(finding.id.clone());
    action.trigger_rule_id = Some(trigger.id.clone());

    let mut payload = template.payload.clone();
    payload.insert("categoryKey".into(), finding.category_key.clone().into());
    payload.insert("fieldKey".into(), finding.field_key.clone().into());
    payload.insert("value".into(), finding.value.clone().into());
    if template.action_type == ActionType::CreateDeadline {
        if let Some(due) = parse_date(&finding.value) {
            payload.insert("dueDate".into(), due.format("%Y-%m-%d").to_string().into());
        }
    }
    action.payload = serde_json::Value::Object(payload);
    action
}

/// Evaluates every trigger and materializes one action per firing trigger.
pub fn evaluate(
    triggers: &[ActionTrigger],
    findings: &[PipelineFinding],
    run_id: &str,
    matter_id: &str,
    today: NaiveDate,
) -> Vec<PipelineAction> {
    let index = FindingIndex::new(findings);
    triggers
        .iter()
        .filter_map(|trigger| {
            first_match(trigger, &index, today)
                .map(|finding| materialize(trigger, finding, run_id, matter_id))
        })
        .collect()
}
