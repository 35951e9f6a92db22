use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Lifecycle of a request or an individual command sequence.
///
/// Transitions are monotonic (`Pending` → `InProgress` → terminal) except for
/// `WaitingForInput`, which a conversation may enter and leave. `BreakLoop`
/// and `ContinueLoop` are success statuses used by control commands to signal
/// the enclosing loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    WaitingForInput,
    BreakLoop,
    ContinueLoop,
}

impl ExecutionStatus {
    /// Terminal statuses leave the owning context immutable except for
    /// deletion.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A single low-level desktop action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Dispatch name, e.g. `mouse.click`, `keyboard.type`, `EXECUTE_SCRIPT`.
    pub command: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// Optional commands swallow their own failures; the sequence continues.
    #[serde(default, alias = "isOptional")]
    pub optional: bool,
    /// Extra settle delay after this command, before the inter-command delay.
    #[serde(default, alias = "delayAfterMs", skip_serializing_if = "Option::is_none")]
    pub delay_after_ms: Option<u64>,
}

impl Command {
    pub fn new(command: impl Into<String>, parameters: Value) -> Self {
        Self {
            command: command.into(),
            parameters,
            description: None,
            priority: None,
            optional: false,
            delay_after_ms: None,
        }
    }

    /// Fetch a string parameter, if present and a string.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(Value::as_str)
    }

    pub fn param_u64(&self, name: &str) -> Option<u64> {
        self.parameters.get(name).and_then(Value::as_u64)
    }

    pub fn param_i64(&self, name: &str) -> Option<i64> {
        self.parameters.get(name).and_then(Value::as_i64)
    }

    pub fn param_bool(&self, name: &str) -> Option<bool> {
        self.parameters.get(name).and_then(Value::as_bool)
    }
}

/// Free-form script metadata, surfaced by the script manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, alias = "requiredParameters")]
    pub required_parameters: Vec<String>,
    #[serde(default, alias = "optionalParameters")]
    pub optional_parameters: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A structured list of commands submitted for execution. Scripts on disk are
/// plans with optional `variables`, `result_variable` and `metadata`.
///
/// `sequence` is accepted as an alias for `commands` anywhere a plan is
/// parsed; downstream code only ever sees `commands`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, alias = "sequence")]
    pub commands: Vec<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ScriptMetadata>,
}

impl Plan {
    pub fn from_commands(commands: Vec<Command>) -> Self {
        Self {
            commands,
            ..Default::default()
        }
    }
}

/// Result of executing a plan, script or request, stored in the completed
/// executions map keyed by request id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub result: Value,
    /// Descriptions of the commands whose handlers succeeded, in execution
    /// order; optional commands that failed are recorded with a marker.
    #[serde(default)]
    pub executed_commands: Vec<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl TaskExecutionResult {
    pub fn succeeded(execution_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Completed,
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failed(execution_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Failed,
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Success carrying a loop-control status (`BreakLoop`/`ContinueLoop`).
    pub fn loop_control(execution_id: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            execution_id: execution_id.into(),
            status,
            success: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sequence_is_accepted_as_alias_for_commands() {
        let with_commands: Plan = serde_json::from_str(
            r#"{"commands":[{"command":"system.sleep","parameters":{"ms":10}}]}"#,
        )
        .expect("plan with commands");
        let with_sequence: Plan = serde_json::from_str(
            r#"{"sequence":[{"command":"system.sleep","parameters":{"ms":10}}]}"#,
        )
        .expect("plan with sequence");
        assert_eq!(with_commands, with_sequence);
    }

    #[test]
    fn command_defaults_are_lenient() {
        let cmd: Command = serde_json::from_str(r#"{"command":"mouse.click"}"#).expect("command");
        assert_eq!(cmd.command, "mouse.click");
        assert!(cmd.parameters.is_object());
        assert!(!cmd.optional);
        assert_eq!(cmd.delay_after_ms, None);
    }

    #[test]
    fn delay_after_ms_accepts_camel_case() {
        let cmd: Command =
            serde_json::from_str(r#"{"command":"keyboard.type","delayAfterMs":250}"#)
                .expect("command");
        assert_eq!(cmd.delay_after_ms, Some(250));
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::WaitingForInput.is_terminal());
        assert!(!ExecutionStatus::BreakLoop.is_terminal());
    }
}
