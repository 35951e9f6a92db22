//! Shapes a planner reply may take on any conversation turn.
//!
//! Replies are plain JSON objects; unknown fields are ignored so planners can
//! attach reasoning or annotations without breaking the turn loop.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::plan::Command;
use crate::plan::Plan;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerResponse {
    pub commands: Option<Vec<Command>>,
    pub execution_plan: Option<Plan>,
    pub environmental_data_request: Option<EnvironmentalDataRequest>,
    pub user_interaction_request: Option<UserInteractionSpec>,
    pub adapted_commands: Option<Vec<Command>>,
    pub alternatives: Option<Vec<Value>>,
    pub recovery_plan: Option<Plan>,
    pub message: Option<String>,
}

impl PlannerResponse {
    pub fn parse(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// The commands of this turn, whether delivered bare or wrapped in an
    /// `execution_plan`.
    pub fn command_list(&self) -> Option<&[Command]> {
        if let Some(commands) = &self.commands {
            return Some(commands);
        }
        self.execution_plan.as_ref().map(|p| p.commands.as_slice())
    }

    /// A turn must carry commands, a data request, an interaction request or
    /// at least a message to be processable.
    pub fn is_actionable(&self) -> bool {
        self.commands.is_some()
            || self.execution_plan.is_some()
            || self.environmental_data_request.is_some()
            || self.user_interaction_request.is_some()
            || self.adapted_commands.is_some()
            || self.recovery_plan.is_some()
            || self.message.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentalDataRequest {
    pub windows: bool,
    #[serde(alias = "applicationState")]
    pub application_state: bool,
    #[serde(alias = "systemResources")]
    pub system_resources: bool,
    pub screenshot: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    #[default]
    Text,
    Choice,
    Password,
    FilePath,
    Confirmation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInteractionSpec {
    #[serde(default)]
    pub prompt: String,
    #[serde(rename = "type", default)]
    pub input_type: InputKind,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub urgent: bool,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn commands_may_be_bare_or_wrapped() {
        let bare = PlannerResponse::parse(&serde_json::json!({
            "commands": [{"command": "system.sleep", "parameters": {"ms": 5}}]
        }))
        .expect("bare");
        assert_eq!(bare.command_list().map(|c| c.len()), Some(1));

        let wrapped = PlannerResponse::parse(&serde_json::json!({
            "execution_plan": {"commands": [{"command": "system.sleep"}]}
        }))
        .expect("wrapped");
        assert_eq!(wrapped.command_list().map(|c| c.len()), Some(1));
    }

    #[test]
    fn environmental_request_accepts_camel_case_flags() {
        let response = PlannerResponse::parse(&serde_json::json!({
            "environmental_data_request": {"windows": true, "applicationState": true}
        }))
        .expect("parse");
        let request = response.environmental_data_request.expect("request");
        assert!(request.windows);
        assert!(request.application_state);
        assert!(!request.screenshot);
    }

    #[test]
    fn interaction_type_defaults_to_text() {
        let response = PlannerResponse::parse(&serde_json::json!({
            "user_interaction_request": {"prompt": "Which file?"}
        }))
        .expect("parse");
        let spec = response.user_interaction_request.expect("spec");
        assert_eq!(spec.input_type, InputKind::Text);
        assert!(!spec.urgent);
    }

    #[test]
    fn empty_object_is_not_actionable() {
        let response = PlannerResponse::parse(&serde_json::json!({})).expect("parse");
        assert!(!response.is_actionable());
    }
}
