use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, string_enum};

string_enum! {
    /// Kind of work item an action represents.
    pub enum ActionType {
        CreateTask => "create_task",
        CreateDeadline => "create_deadline",
        UpdateField => "update_field",
        SendNotification => "send_notification",
        FlagRisk => "flag_risk",
        RequestReview => "request_review",
        AiRecommendation => "ai_recommendation",
    }
}

string_enum! {
    pub enum ActionStatus {
        Pending => "pending",
        Accepted => "accepted",
        Dismissed => "dismissed",
        Executed => "executed",
        Failed => "failed",
    }
}

/// A generated follow-up work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineAction {
    pub id: String,
    pub run_id: String,
    pub matter_id: String,
    pub action_type: ActionType,
    pub title: String,
    pub description: Option<String>,
    /// Lower is more urgent; 0 is critical.
    pub priority: i64,
    pub status: ActionStatus,
    pub is_deterministic: bool,
    pub payload: serde_json::Value,
    pub trigger_finding_id: Option<String>,
    pub trigger_rule_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PipelineAction {
    /// A pending deterministic action with an empty payload.
    pub fn new(
        run_id: impl Into<String>,
        matter_id: impl Into<String>,
        action_type: ActionType,
        title: impl Into<String>,
        priority: i64,
    ) -> Self {
        Self {
            id: new_id(),
            run_id: run_id.into(),
            matter_id: matter_id.into(),
            action_type,
            title: title.into(),
            description: None,
            priority,
            status: ActionStatus::Pending,
            is_deterministic: true,
            payload: serde_json::Value::Object(serde_json::Map::new()),
            trigger_finding_id: None,
            trigger_rule_id: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_strings() {
        assert_eq!(ActionType::FlagRisk.as_str(), "flag_risk");
        assert_eq!(
            "create_deadline".parse::<ActionType>().unwrap(),
            ActionType::CreateDeadline
        );
        assert!("delete_everything".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_new_action_defaults() {
        let action = PipelineAction::new("run", "matter", ActionType::CreateTask, "Do it", 2);
        assert_eq!(action.status, ActionStatus::Pending);
        assert!(action.is_deterministic);
        assert!(action.payload.as_object().unwrap().is_empty());
    }
}
