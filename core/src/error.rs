use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy for the orchestration core.
///
/// Validation failures (`InvalidInput` through `CircularScriptDependency`)
/// fail early and are never retried. `AdapterFailure` and `TimedOut` are
/// retryable through the recovery path. `Cancelled` and `EmergencyStop` are
/// cooperative terminations observed at command boundaries.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("command `{command}` missing parameter `{parameter}`")]
    MissingParameter { command: String, parameter: String },

    #[error("script not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("script path escapes the scripts root: {0}")]
    ScriptPathUnsafe(PathBuf),

    #[error("script nesting depth {depth} reached the configured maximum of {max}")]
    MaxNestingExceeded { depth: usize, max: usize },

    #[error("circular script dependency: {0}")]
    CircularScriptDependency(PathBuf),

    #[error("adapter failure: {0}")]
    AdapterFailure(String),

    #[error("command `{0}` timed out")]
    TimedOut(String),

    #[error("resource usage exceeds configured thresholds: {0}")]
    ResourceExhausted(String),

    #[error("no planner transport is configured")]
    PlannerUnavailable,

    #[error("timed out waiting for user response to interaction {0}")]
    UserInteractionTimeout(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("emergency stop engaged")]
    EmergencyStop,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Whether the recovery path may retry after this error. Validation and
    /// termination errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AdapterFailure(_) | Self::TimedOut(_) | Self::Http(_) | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!EngineError::InvalidPlan("empty".into()).is_retryable());
        assert!(!EngineError::ScriptPathUnsafe(PathBuf::from("../x")).is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(!EngineError::EmergencyStop.is_retryable());
    }

    #[test]
    fn adapter_failures_are_retryable() {
        assert!(EngineError::AdapterFailure("click missed".into()).is_retryable());
        assert!(EngineError::TimedOut("mouse.click".into()).is_retryable());
    }
}
