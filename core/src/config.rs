//! Startup configuration, read once from a single JSON document.
//!
//! Every knob has a serde default so a partial or absent file still yields a
//! fully populated [`Config`].

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub scripts: ScriptConfig,
    pub conversation: ConversationConfig,
    pub feedback: FeedbackConfig,
    pub events: EventConfig,
    pub resources: ResourceThresholds,
    /// JSON-POST endpoint of the planner transport. Absent means no planner
    /// is wired and requests must carry pre-parsed commands.
    pub planner_endpoint: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    pub execution_timeout_ms: u64,
    pub main_loop_delay_ms: u64,
    pub command_sequence_delay_ms: u64,
    pub error_recovery_enabled: bool,
    pub error_recovery_delay_ms: u64,
    pub max_error_retries: u32,
    pub max_completed_executions: usize,
    pub activity_log_size: usize,
    /// Default iteration cap for `WHILE` loops that do not set their own.
    pub max_loop_iterations: u64,
    pub confirmation_required: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            execution_timeout_ms: 30_000,
            main_loop_delay_ms: 100,
            command_sequence_delay_ms: 1_000,
            error_recovery_enabled: true,
            error_recovery_delay_ms: 2_000,
            max_error_retries: 3,
            max_completed_executions: 100,
            activity_log_size: 1_000,
            max_loop_iterations: 100,
            confirmation_required: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// The only prefix scripts may be loaded from.
    pub scripts_root: PathBuf,
    pub max_nesting: usize,
    pub cache_enabled: bool,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            scripts_root: PathBuf::from("scripts"),
            max_nesting: 3,
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub max_turns: u32,
    /// Timeout for a pending user interaction.
    pub user_input_timeout_ms: u64,
    /// Inactive conversations older than this are swept.
    pub expiration_ms: u64,
    /// How long the request pipeline waits for the planner to publish a plan.
    pub plan_wait_timeout_ms: u64,
    pub max_history_entries: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            user_input_timeout_ms: 30_000,
            expiration_ms: 600_000,
            plan_wait_timeout_ms: 5_000,
            max_history_entries: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub enabled: bool,
    pub environment_check_interval_ms: u64,
    pub max_environment_history: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            environment_check_interval_ms: 1_000,
            max_environment_history: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub history_enabled: bool,
    pub max_history: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            history_enabled: true,
            max_history: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThresholds {
    pub enabled: bool,
    pub max_memory_mb: u64,
    pub max_file_handles: u64,
    pub max_window_handles: u64,
    pub max_process_handles: u64,
    pub max_threads: u64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            enabled: true,
            max_memory_mb: 1_024,
            max_file_handles: 100,
            max_window_handles: 50,
            max_process_handles: 50,
            max_threads: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_document_fills_in_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"orchestrator": {"max_concurrent_tasks": 8}, "scripts": {"max_nesting": 5}}"#,
        )
        .expect("config");
        assert_eq!(config.orchestrator.max_concurrent_tasks, 8);
        assert_eq!(config.orchestrator.execution_timeout_ms, 30_000);
        assert_eq!(config.scripts.max_nesting, 5);
        assert_eq!(config.scripts.scripts_root, PathBuf::from("scripts"));
        assert!(config.planner_endpoint.is_none());
    }

    #[test]
    fn empty_document_is_valid() {
        let config: Config = serde_json::from_str("{}").expect("config");
        assert_eq!(config.conversation.max_turns, 10);
        assert_eq!(config.feedback.environment_check_interval_ms, 1_000);
        assert!(config.resources.enabled);
    }
}
