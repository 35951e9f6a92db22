//! Timer-driven environment monitor that keeps the plan honest against a
//! moving desktop.
//!
//! A background task snapshots the environment on a fixed interval, computes
//! the delta against the previous snapshot, and on a significant change
//! records the adaptation rules that matched. The execution engine drains
//! those rules at command boundaries and they become hints in the context's
//! variables.

// Poisoned locks should fail the program.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::adapter::OsAdapter;
use crate::adapter::capture_snapshot;
use crate::events::EventBus;
use crate::planner::PlannerTransport;
use crate::state::ExecutionContext;
use deskpilot_protocol::EnvironmentDelta;
use deskpilot_protocol::EnvironmentSnapshot;
use deskpilot_protocol::OrchestratorEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    WindowClosed,
    WindowChanged,
    WindowsAdded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    RetryCommand,
    WaitAndRetry,
    FindAlternativeWindow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationRule {
    pub name: String,
    pub condition: RuleCondition,
    pub action: RuleAction,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AdaptationRule {
    fn matches(&self, delta: &EnvironmentDelta) -> bool {
        if !self.enabled {
            return false;
        }
        match self.condition {
            RuleCondition::WindowClosed => !delta.windows_removed.is_empty(),
            RuleCondition::WindowChanged => delta.active_window_changed.is_some(),
            RuleCondition::WindowsAdded => !delta.windows_added.is_empty(),
        }
    }
}

#[derive(Default)]
struct FeedbackState {
    last_snapshot: Option<EnvironmentSnapshot>,
    history: VecDeque<EnvironmentSnapshot>,
    success_counts: HashMap<String, u64>,
    failure_counts: HashMap<String, u64>,
    /// Rules matched by the latest significant delta, waiting to be drained
    /// at a command boundary.
    pending_rules: Vec<AdaptationRule>,
    last_delta: Option<EnvironmentDelta>,
}

pub struct FeedbackController {
    adapter: Arc<dyn OsAdapter>,
    planner: Option<Arc<dyn PlannerTransport>>,
    events: Arc<EventBus>,
    state: Mutex<FeedbackState>,
    rules: Mutex<Vec<AdaptationRule>>,
    interval_ms: u64,
    max_history: usize,
    monitoring: AtomicBool,
    stop: Notify,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedbackController {
    pub fn new(
        adapter: Arc<dyn OsAdapter>,
        planner: Option<Arc<dyn PlannerTransport>>,
        events: Arc<EventBus>,
        interval_ms: u64,
        max_history: usize,
    ) -> Self {
        Self {
            adapter,
            planner,
            events,
            state: Mutex::new(FeedbackState::default()),
            rules: Mutex::new(Vec::new()),
            interval_ms: interval_ms.max(10),
            max_history: max_history.max(1),
            monitoring: AtomicBool::new(false),
            stop: Notify::new(),
            monitor_task: Mutex::new(None),
        }
    }

    /// The stock rule set: closed windows suggest waiting and retrying,
    /// focus changes suggest a retry, new windows suggest finding an
    /// alternative target.
    pub fn install_default_rules(&self) {
        let mut rules = self.rules.lock().unwrap();
        if !rules.is_empty() {
            return;
        }
        rules.push(AdaptationRule {
            name: "window-closed-wait".to_string(),
            condition: RuleCondition::WindowClosed,
            action: RuleAction::WaitAndRetry,
            parameters: json!({"wait_ms": 1000}),
            priority: 100,
            enabled: true,
        });
        rules.push(AdaptationRule {
            name: "focus-changed-retry".to_string(),
            condition: RuleCondition::WindowChanged,
            action: RuleAction::RetryCommand,
            parameters: Value::Null,
            priority: 50,
            enabled: true,
        });
        rules.push(AdaptationRule {
            name: "new-windows-alternative".to_string(),
            condition: RuleCondition::WindowsAdded,
            action: RuleAction::FindAlternativeWindow,
            parameters: Value::Null,
            priority: 10,
            enabled: true,
        });
    }

    pub fn start(this: &Arc<Self>) {
        if this.monitoring.swap(true, Ordering::SeqCst) {
            return;
        }
        let controller = Arc::clone(this);
        let handle = tokio::spawn(async move {
            controller.monitor_loop().await;
        });
        *this.monitor_task.lock().unwrap() = Some(handle);
        info!("continuous environment monitoring started");
    }

    pub async fn stop(&self) {
        if !self.monitoring.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop.notify_waiters();
        let handle = self.monitor_task.lock().unwrap().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("feedback monitor task ended abnormally: {e}");
        }
        info!("continuous environment monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    async fn monitor_loop(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.interval_ms)) => {}
                _ = self.stop.notified() => break,
            }
            if !self.monitoring.load(Ordering::SeqCst) {
                break;
            }
            let snapshot = capture_snapshot(self.adapter.as_ref()).await;
            self.observe_snapshot(snapshot);
        }
    }

    /// Fold a fresh snapshot into the state; on a significant delta, queue
    /// the matching rules and raise ENVIRONMENT_CHANGED.
    pub fn observe_snapshot(&self, snapshot: EnvironmentSnapshot) {
        let significant_delta = {
            let mut state = self.state.lock().unwrap();
            let delta = state
                .last_snapshot
                .as_ref()
                .map(|previous| EnvironmentDelta::between(previous, &snapshot));

            state.last_snapshot = Some(snapshot.clone());
            state.history.push_back(snapshot);
            while state.history.len() > self.max_history {
                state.history.pop_front();
            }

            match delta {
                Some(delta) if !delta.is_empty() && delta.is_significant() => {
                    let matched = self.matching_rules(&delta);
                    if !matched.is_empty() {
                        debug!(
                            rules = matched.len(),
                            "environment change matched adaptation rules"
                        );
                        state.pending_rules = matched;
                    }
                    state.last_delta = Some(delta.clone());
                    Some(delta)
                }
                _ => None,
            }
        };

        if let Some(delta) = significant_delta {
            let metadata = serde_json::to_value(&delta).unwrap_or(Value::Null);
            self.events.raise(
                deskpilot_protocol::EventData::new(
                    OrchestratorEvent::EnvironmentChanged,
                    "significant environment change detected",
                )
                .with_metadata(metadata),
            );
        }
    }

    fn matching_rules(&self, delta: &EnvironmentDelta) -> Vec<AdaptationRule> {
        let mut matched: Vec<AdaptationRule> = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|rule| rule.matches(delta))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));
        matched
    }

    /// Drain pending rules into adaptation hints in the context's variables.
    /// Called by the engine at command boundaries.
    pub fn apply_pending_hints(&self, context: &mut ExecutionContext) {
        let pending = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.pending_rules)
        };
        for rule in pending {
            debug!(rule = %rule.name, "applying adaptation rule");
            match rule.action {
                RuleAction::RetryCommand => {
                    context.variables.set("retry_required", json!(true));
                    context
                        .variables
                        .set("retry_reason", json!("environment change detected"));
                }
                RuleAction::WaitAndRetry => {
                    let wait_ms = rule
                        .parameters
                        .get("wait_ms")
                        .and_then(Value::as_u64)
                        .unwrap_or(1000);
                    context.variables.set("wait_required", json!(true));
                    context.variables.set("wait_duration_ms", json!(wait_ms));
                }
                RuleAction::FindAlternativeWindow => {
                    context.variables.set("find_alternative", json!(true));
                    context.variables.set("alternative_type", json!("window"));
                }
            }
        }
    }

    pub fn record_command_result(&self, command: &str, success: bool) {
        let mut state = self.state.lock().unwrap();
        let counts = if success {
            &mut state.success_counts
        } else {
            &mut state.failure_counts
        };
        *counts.entry(command.to_string()).or_insert(0) += 1;
    }

    /// Success rate in `[0, 1]`; with no data the rate is 1.0.
    pub fn success_rate(&self, command: &str) -> f64 {
        let state = self.state.lock().unwrap();
        let successes = state.success_counts.get(command).copied().unwrap_or(0);
        let failures = state.failure_counts.get(command).copied().unwrap_or(0);
        let total = successes + failures;
        if total == 0 {
            return 1.0;
        }
        successes as f64 / total as f64
    }

    pub fn success_metrics(&self) -> Value {
        let state = self.state.lock().unwrap();
        let mut metrics = serde_json::Map::new();
        let mut commands: Vec<&String> = state
            .success_counts
            .keys()
            .chain(state.failure_counts.keys())
            .collect();
        commands.sort();
        commands.dedup();
        for command in commands {
            let successes = state.success_counts.get(command).copied().unwrap_or(0);
            let failures = state.failure_counts.get(command).copied().unwrap_or(0);
            let rate = if successes + failures == 0 {
                1.0
            } else {
                successes as f64 / (successes + failures) as f64
            };
            metrics.insert(
                command.clone(),
                json!({
                    "success_count": successes,
                    "failure_count": failures,
                    "success_rate": rate,
                }),
            );
        }
        Value::Object(metrics)
    }

    pub fn reset_success_metrics(&self) {
        let mut state = self.state.lock().unwrap();
        state.success_counts.clear();
        state.failure_counts.clear();
    }

    /// Fallback alternatives for commands whose success rate has degraded.
    pub fn generate_alternatives_for(&self, command: &str) -> Value {
        match command {
            "window.focus" => json!([
                {"command": "window.enumerate", "description": "enumerate windows to find the target"},
                {"command": "window.find", "description": "find window by partial title match"},
            ]),
            "mouse.click" => json!([
                {"command": "keyboard.press", "parameters": {"key": "Tab"},
                 "description": "navigate with the keyboard instead"},
            ]),
            _ => json!([]),
        }
    }

    /// Suggestions for every tracked command whose success rate fell below
    /// one half.
    pub fn adaptive_suggestions(&self) -> Value {
        let commands: Vec<String> = {
            let state = self.state.lock().unwrap();
            let mut commands: Vec<String> = state
                .success_counts
                .keys()
                .chain(state.failure_counts.keys())
                .cloned()
                .collect();
            commands.sort();
            commands.dedup();
            commands
        };

        let mut suggestions = Vec::new();
        for command in commands {
            let rate = self.success_rate(&command);
            if rate < 0.5 {
                suggestions.push(json!({
                    "command": command,
                    "success_rate": rate,
                    "alternatives": self.generate_alternatives_for(&command),
                }));
            }
        }
        Value::Array(suggestions)
    }

    /// Ask the planner to analyze the latest environment against its history.
    /// Returns the planner's suggestions, if any.
    pub async fn request_planner_analysis(&self, original_request: &str) -> Option<Value> {
        let planner = self.planner.as_ref()?;
        let (snapshot, history) = {
            let state = self.state.lock().unwrap();
            (
                state.last_snapshot.clone(),
                state.history.iter().cloned().collect::<Vec<_>>(),
            )
        };
        let prompt = json!({
            "type": "environment_analysis",
            "current_environment": snapshot,
            "current_task": original_request,
            "environment_history": history,
        });
        match planner.send_prompt(prompt).await {
            Ok(response) => response.get("suggestions").cloned(),
            Err(e) => {
                warn!("planner environment analysis failed: {e}");
                None
            }
        }
    }

    pub fn last_snapshot(&self) -> Option<EnvironmentSnapshot> {
        self.state.lock().unwrap().last_snapshot.clone()
    }

    pub fn last_delta(&self) -> Option<EnvironmentDelta> {
        self.state.lock().unwrap().last_delta.clone()
    }

    pub fn environment_history(&self) -> Vec<EnvironmentSnapshot> {
        self.state.lock().unwrap().history.iter().cloned().collect()
    }

    pub fn clear_environment_history(&self) {
        self.state.lock().unwrap().history.clear();
    }

    pub fn add_rule(&self, rule: AdaptationRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn remove_rule(&self, name: &str) {
        self.rules.lock().unwrap().retain(|rule| rule.name != name);
    }

    pub fn set_rule_enabled(&self, name: &str, enabled: bool) {
        for rule in self.rules.lock().unwrap().iter_mut() {
            if rule.name == name {
                rule.enabled = enabled;
            }
        }
    }

    pub fn rules(&self) -> Vec<AdaptationRule> {
        self.rules.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::adapter::NoopAdapter;
    use deskpilot_protocol::WindowInfo;
    use deskpilot_protocol::environment::SystemInfo;
    use pretty_assertions::assert_eq;

    fn controller() -> FeedbackController {
        FeedbackController::new(
            Arc::new(NoopAdapter),
            None,
            Arc::new(EventBus::new(true, 16)),
            1000,
            4,
        )
    }

    fn snapshot_with(windows: Vec<&str>, active: Option<&str>) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            windows: windows
                .into_iter()
                .map(|title| WindowInfo {
                    title: title.to_string(),
                    class_name: "w".to_string(),
                    ..Default::default()
                })
                .collect(),
            active_window: active.map(|title| WindowInfo {
                title: title.to_string(),
                class_name: "w".to_string(),
                ..Default::default()
            }),
            system: SystemInfo::default(),
        }
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("REQ-T".to_string(), "test".to_string(), 3)
    }

    #[test]
    fn success_rate_defaults_to_one() {
        let controller = controller();
        assert_eq!(controller.success_rate("mouse.click"), 1.0);
        controller.record_command_result("mouse.click", true);
        controller.record_command_result("mouse.click", false);
        assert_eq!(controller.success_rate("mouse.click"), 0.5);
    }

    #[test]
    fn window_removal_queues_wait_and_retry_hint() {
        let controller = controller();
        controller.install_default_rules();

        controller.observe_snapshot(snapshot_with(vec!["editor"], None));
        controller.observe_snapshot(snapshot_with(vec![], None));

        let mut ctx = context();
        controller.apply_pending_hints(&mut ctx);
        assert_eq!(ctx.variables.get("wait_required"), Some(json!(true)));
        assert_eq!(ctx.variables.get("wait_duration_ms"), Some(json!(1000)));
    }

    #[test]
    fn pending_hints_are_drained_once() {
        let controller = controller();
        controller.install_default_rules();
        controller.observe_snapshot(snapshot_with(vec!["editor"], None));
        controller.observe_snapshot(snapshot_with(vec![], None));

        let mut first = context();
        controller.apply_pending_hints(&mut first);
        assert!(first.variables.has("wait_required"));

        let mut second = context();
        controller.apply_pending_hints(&mut second);
        assert!(!second.variables.has("wait_required"));
    }

    #[test]
    fn insignificant_changes_queue_nothing() {
        let controller = controller();
        controller.install_default_rules();
        controller.observe_snapshot(snapshot_with(vec!["a"], None));
        controller.observe_snapshot(snapshot_with(vec!["a", "b"], None));

        let mut ctx = context();
        controller.apply_pending_hints(&mut ctx);
        assert!(!ctx.variables.has("wait_required"));
        assert!(!ctx.variables.has("retry_required"));
    }

    #[test]
    fn history_is_bounded() {
        let controller = controller();
        for i in 0..10 {
            controller.observe_snapshot(snapshot_with(vec![], Some(&format!("w{i}"))));
        }
        assert_eq!(controller.environment_history().len(), 4);
        controller.clear_environment_history();
        assert!(controller.environment_history().is_empty());
    }

    #[test]
    fn suggestions_appear_below_half_success() {
        let controller = controller();
        controller.record_command_result("window.focus", false);
        controller.record_command_result("window.focus", false);
        controller.record_command_result("window.focus", true);

        let suggestions = controller.adaptive_suggestions();
        let list = suggestions.as_array().expect("array");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["command"], "window.focus");
        assert!(!list[0]["alternatives"].as_array().expect("alts").is_empty());
    }

    #[test]
    fn rules_can_be_disabled_and_removed() {
        let controller = controller();
        controller.install_default_rules();
        assert_eq!(controller.rules().len(), 3);

        controller.set_rule_enabled("window-closed-wait", false);
        controller.observe_snapshot(snapshot_with(vec!["editor"], None));
        controller.observe_snapshot(snapshot_with(vec![], None));
        let mut ctx = context();
        controller.apply_pending_hints(&mut ctx);
        assert!(!ctx.variables.has("wait_required"));

        controller.remove_rule("focus-changed-retry");
        assert_eq!(controller.rules().len(), 2);
    }
}
