use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Event codes raised on the orchestrator event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorEvent {
    UserRequest,
    TaskCompleted,
    TaskFailed,
    EnvironmentChanged,
    EmergencyStop,
    ExecutionStarted,
    ExecutionPaused,
    ExecutionResumed,
    CommandExecuted,
    ErrorOccurred,
    UserInteractionRequired,
    UserInteractionReceived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    #[serde(rename = "type")]
    pub kind: OrchestratorEvent,
    pub data: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EventData {
    pub fn new(kind: OrchestratorEvent, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            metadata: Value::Null,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_request(
        kind: OrchestratorEvent,
        data: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..Self::new(kind, data)
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
