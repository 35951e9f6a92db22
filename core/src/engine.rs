//! Interprets command sequences against an execution context: variable
//! substitution, prefix dispatch to the OS adapter, control commands with
//! loop semantics, and bounded nested script execution.

// Poisoned locks should fail the program.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::adapter::ActionOutcome;
use crate::adapter::OsAdapter;
use crate::adapter::capture_snapshot;
use crate::error::EngineError;
use crate::error::Result;
use crate::events::EventBus;
use crate::feedback::FeedbackController;
use crate::scripts::ScriptManager;
use crate::state::ExecutionContext;
use deskpilot_protocol::Command;
use deskpilot_protocol::ExecutionStatus;
use deskpilot_protocol::OrchestratorEvent;
use deskpilot_protocol::TaskExecutionResult;

/// Outcome of a single dispatched command. `status` is `Completed` for
/// ordinary success and `BreakLoop`/`ContinueLoop` for control commands.
struct CommandOutcome {
    output: String,
    data: Value,
    status: ExecutionStatus,
}

impl CommandOutcome {
    fn done(output: String, data: Value) -> Self {
        Self {
            output,
            data,
            status: ExecutionStatus::Completed,
        }
    }

    fn control(status: ExecutionStatus) -> Self {
        Self {
            output: String::new(),
            data: Value::Null,
            status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub execution_timeout_ms: u64,
    pub command_sequence_delay_ms: u64,
    pub max_loop_iterations: u64,
}

pub struct ExecutionEngine {
    adapter: Arc<dyn OsAdapter>,
    scripts: Arc<ScriptManager>,
    feedback: Arc<FeedbackController>,
    events: Arc<EventBus>,
    emergency_stop: Arc<AtomicBool>,
    cancelled: Arc<Mutex<HashSet<String>>>,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(
        adapter: Arc<dyn OsAdapter>,
        scripts: Arc<ScriptManager>,
        feedback: Arc<FeedbackController>,
        events: Arc<EventBus>,
        emergency_stop: Arc<AtomicBool>,
        cancelled: Arc<Mutex<HashSet<String>>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            adapter,
            scripts,
            feedback,
            events,
            emergency_stop,
            cancelled,
            settings,
        }
    }

    /// Execute commands in array order. Optional commands swallow their own
    /// failures; any other failure terminates the sequence. The stop latch
    /// and cancellation are observed at every command boundary.
    pub async fn execute_command_sequence(
        &self,
        commands: &[Command],
        ctx: &mut ExecutionContext,
    ) -> TaskExecutionResult {
        let started = Instant::now();
        let mut result = TaskExecutionResult {
            execution_id: ctx.request_id.clone(),
            status: ExecutionStatus::Completed,
            success: true,
            ..Default::default()
        };

        for command in commands {
            if self.emergency_stop.load(Ordering::SeqCst) {
                result.success = false;
                result.status = ExecutionStatus::Failed;
                result.error_message = Some(EngineError::EmergencyStop.to_string());
                break;
            }
            if self.is_cancelled(&ctx.request_id) {
                result.success = false;
                result.status = ExecutionStatus::Cancelled;
                result.error_message = Some("execution cancelled by user".to_string());
                break;
            }

            self.consume_adaptation_hints(ctx).await;

            match self.execute_command(command, ctx).await {
                Ok(outcome) => {
                    self.feedback.record_command_result(&command.command, true);
                    result.executed_commands.push(command.command.clone());
                    if !outcome.output.is_empty() {
                        result.output = outcome.output;
                    }
                    if !outcome.data.is_null() {
                        result.result = outcome.data;
                    }
                    ctx.log(format!("executed: {}", command.command));
                    self.events.raise_for_request(
                        OrchestratorEvent::CommandExecuted,
                        command.command.clone(),
                        &ctx.request_id,
                    );

                    if matches!(
                        outcome.status,
                        ExecutionStatus::BreakLoop | ExecutionStatus::ContinueLoop
                    ) {
                        result.status = outcome.status;
                        break;
                    }
                }
                Err(e) => {
                    self.feedback.record_command_result(&command.command, false);
                    if command.optional {
                        warn!(command = %command.command, "optional command failed: {e}");
                        ctx.log(format!("optional command failed: {} ({e})", command.command));
                        result
                            .executed_commands
                            .push(format!("{} (optional, failed)", command.command));
                    } else {
                        ctx.log(format!("command failed: {} ({e})", command.command));
                        result.success = false;
                        result.status = match e {
                            EngineError::Cancelled => ExecutionStatus::Cancelled,
                            _ => ExecutionStatus::Failed,
                        };
                        result.error_message = Some(e.to_string());
                        break;
                    }
                }
            }

            if let Some(delay) = command.delay_after_ms {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.settings.command_sequence_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(
                    self.settings.command_sequence_delay_ms,
                ))
                .await;
            }
        }

        result.execution_time_ms = started.elapsed().as_millis() as u64;
        result
    }

    /// Dispatch a single command by prefix or exact name.
    async fn execute_command(
        &self,
        command: &Command,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandOutcome> {
        let variables = ctx.variables.snapshot();
        let params = substitute_value(&command.parameters, &variables);
        let name = command.command.as_str();
        debug!(command = name, request_id = %ctx.request_id, "dispatching command");

        let outcome = match name {
            _ if name.starts_with("mouse.") => self.run_mouse(name, &params).await?,
            _ if name.starts_with("keyboard.") => self.run_keyboard(name, &params).await?,
            _ if name.starts_with("window.") || name.starts_with("UIA_") => {
                self.run_window(name, &params).await?
            }
            _ if name.starts_with("application.") => self.run_application(name, &params).await?,
            _ if name.starts_with("system.") => self.run_system(name, &params).await?,
            "EXECUTE_SCRIPT" | "script.execute" => {
                return self.run_script_command(&params, ctx).await;
            }
            "WHILE" => return self.run_while_loop(&params, ctx).await,
            "IF_CONTAINS" => return self.run_if_contains(&params, ctx).await,
            "CONDITIONAL_STOP" => {
                let condition = params.get("condition").cloned().unwrap_or(Value::Null);
                return if self.evaluate_condition(&condition, ctx).await? {
                    Ok(CommandOutcome::control(ExecutionStatus::BreakLoop))
                } else {
                    Ok(CommandOutcome::done(String::new(), Value::Null))
                };
            }
            "BREAK" => return Ok(CommandOutcome::control(ExecutionStatus::BreakLoop)),
            "CONTINUE" => return Ok(CommandOutcome::control(ExecutionStatus::ContinueLoop)),
            _ => return Err(EngineError::UnknownCommand(name.to_string())),
        };

        // Any adapter command may ask for its output to be captured.
        if let Some(result_variable) = params.get("result_variable").and_then(Value::as_str) {
            let captured = if outcome.data.is_null() {
                json!(outcome.output)
            } else {
                outcome.data.clone()
            };
            ctx.variables.set(result_variable, captured);
        }
        Ok(outcome)
    }

    async fn run_mouse(&self, name: &str, params: &Value) -> Result<CommandOutcome> {
        match name {
            "mouse.click" => {
                let x = require_i64(name, params, "x")?;
                let y = require_i64(name, params, "y")?;
                let button = params
                    .get("button")
                    .and_then(Value::as_str)
                    .unwrap_or("left");
                self.adapter_call(name, self.adapter.mouse_click(x, y, button))
                    .await
            }
            "mouse.move" => {
                let x = require_i64(name, params, "x")?;
                let y = require_i64(name, params, "y")?;
                self.adapter_call(name, self.adapter.mouse_move(x, y)).await
            }
            "mouse.drag" => {
                let from_x = require_i64(name, params, "from_x")?;
                let from_y = require_i64(name, params, "from_y")?;
                let to_x = require_i64(name, params, "to_x")?;
                let to_y = require_i64(name, params, "to_y")?;
                self.adapter_call(name, self.adapter.mouse_drag(from_x, from_y, to_x, to_y))
                    .await
            }
            _ => Err(EngineError::UnknownCommand(name.to_string())),
        }
    }

    async fn run_keyboard(&self, name: &str, params: &Value) -> Result<CommandOutcome> {
        match name {
            "keyboard.type" => {
                let text = require_str(name, params, "text")?;
                self.adapter_call(name, self.adapter.key_type(text)).await
            }
            "keyboard.press" => {
                let key = require_str(name, params, "key")?;
                self.adapter_call(name, self.adapter.key_press(key)).await
            }
            "keyboard.hotkey" => {
                let keys: Vec<String> = params
                    .get("keys")
                    .and_then(Value::as_array)
                    .map(|keys| {
                        keys.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .ok_or_else(|| missing(name, "keys"))?;
                self.adapter_call(name, self.adapter.hotkey(&keys)).await
            }
            _ => Err(EngineError::UnknownCommand(name.to_string())),
        }
    }

    async fn run_window(&self, name: &str, params: &Value) -> Result<CommandOutcome> {
        match name {
            "window.enumerate" | "UIA_ENUM_WINDOWS" => {
                let windows = self.adapter.list_windows().await;
                let data = serde_json::to_value(&windows)?;
                Ok(CommandOutcome::done(
                    format!("{} windows", windows.len()),
                    data,
                ))
            }
            "window.find" | "UIA_FIND_WINDOW" => {
                let title = require_str(name, params, "title_contains")?;
                let windows = self.adapter.list_windows().await;
                let found = windows.iter().find(|w| w.title.contains(title));
                match found {
                    Some(window) => Ok(CommandOutcome::done(
                        window.title.clone(),
                        serde_json::to_value(window)?,
                    )),
                    None => Err(EngineError::AdapterFailure(format!(
                        "no window matching `{title}`"
                    ))),
                }
            }
            "window.focus" | "UIA_FOCUS_WINDOW" => {
                let title = require_str(name, params, "title")?;
                self.adapter_call(name, self.adapter.focus_window(title))
                    .await
            }
            "window.close" => {
                let title = require_str(name, params, "title")?;
                self.adapter_call(name, self.adapter.close_window(title))
                    .await
            }
            "window.bounds" => {
                let title = require_str(name, params, "title")?;
                self.adapter_call(name, self.adapter.window_bounds(title))
                    .await
            }
            _ => Err(EngineError::UnknownCommand(name.to_string())),
        }
    }

    async fn run_application(&self, name: &str, params: &Value) -> Result<CommandOutcome> {
        match name {
            "application.launch" => {
                let path = require_str(name, params, "path")?;
                let args: Vec<String> = params
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|args| {
                        args.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                self.adapter_call(name, self.adapter.launch_application(path, &args))
                    .await
            }
            "application.close" => {
                let target = require_str(name, params, "name")?;
                self.adapter_call(name, self.adapter.terminate_application(target))
                    .await
            }
            "application.wait" => {
                let target = require_str(name, params, "name")?;
                let timeout_ms = params
                    .get("timeout_ms")
                    .and_then(Value::as_u64)
                    .unwrap_or(self.settings.execution_timeout_ms);
                self.adapter_call(name, self.adapter.wait_for_process(target, timeout_ms))
                    .await
            }
            _ => Err(EngineError::UnknownCommand(name.to_string())),
        }
    }

    async fn run_system(&self, name: &str, params: &Value) -> Result<CommandOutcome> {
        match name {
            "system.sleep" => {
                let ms = params
                    .get("ms")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| missing(name, "ms"))?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(CommandOutcome::done(format!("slept {ms}ms"), Value::Null))
            }
            "system.run" => {
                let command_line = require_str(name, params, "command")?;
                self.adapter_call(name, self.adapter.run_system_command(command_line))
                    .await
            }
            "system.clipboard_get" => self.adapter_call(name, self.adapter.clipboard_get()).await,
            "system.clipboard_set" => {
                let text = require_str(name, params, "text")?;
                self.adapter_call(name, self.adapter.clipboard_set(text))
                    .await
            }
            _ => Err(EngineError::UnknownCommand(name.to_string())),
        }
    }

    /// Run an adapter operation under the per-command timeout. There is no
    /// forced cancellation of the underlying OS action; the adapter honors
    /// its own timeouts.
    async fn adapter_call(
        &self,
        name: &str,
        operation: impl Future<Output = ActionOutcome>,
    ) -> Result<CommandOutcome> {
        let timeout = Duration::from_millis(self.settings.execution_timeout_ms);
        match tokio::time::timeout(timeout, operation).await {
            Ok(outcome) if outcome.success => Ok(CommandOutcome::done(outcome.output, outcome.data)),
            Ok(outcome) => Err(EngineError::AdapterFailure(
                outcome
                    .error
                    .unwrap_or_else(|| format!("{name} reported failure")),
            )),
            Err(_) => Err(EngineError::TimedOut(name.to_string())),
        }
    }

    /// `WHILE { condition, body, max_iterations }`: evaluate, run the body as
    /// a sub-sequence, honor Break/Continue, stop at the iteration cap
    /// regardless of the condition.
    async fn run_while_loop(
        &self,
        params: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandOutcome> {
        let condition = params.get("condition").cloned().unwrap_or(Value::Null);
        let body: Vec<Command> = serde_json::from_value(
            params
                .get("body")
                .cloned()
                .ok_or_else(|| missing("WHILE", "body"))?,
        )?;
        let max_iterations = params
            .get("max_iterations")
            .and_then(Value::as_u64)
            .unwrap_or(self.settings.max_loop_iterations);

        let mut iterations = 0u64;
        while iterations < max_iterations {
            if !self.evaluate_condition(&condition, ctx).await? {
                break;
            }
            iterations += 1;

            let body_result = self.sequence_boxed(&body, ctx).await;
            if !body_result.success {
                return Err(EngineError::AdapterFailure(
                    body_result
                        .error_message
                        .unwrap_or_else(|| "loop body failed".to_string()),
                ));
            }
            match body_result.status {
                ExecutionStatus::BreakLoop => break,
                ExecutionStatus::ContinueLoop => continue,
                _ => {}
            }
        }

        Ok(CommandOutcome::done(
            format!("loop ran {iterations} iterations"),
            json!({"iterations": iterations}),
        ))
    }

    async fn run_if_contains(
        &self,
        params: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandOutcome> {
        let input = require_str("IF_CONTAINS", params, "input")?;
        let needle = require_str("IF_CONTAINS", params, "substring")?;
        let branch = if input.contains(needle) {
            params.get("then")
        } else {
            params.get("else")
        };
        let Some(branch) = branch else {
            return Ok(CommandOutcome::done(String::new(), Value::Null));
        };
        let commands: Vec<Command> = serde_json::from_value(branch.clone())?;
        let result = self.sequence_boxed(&commands, ctx).await;
        if !result.success {
            return Err(EngineError::AdapterFailure(
                result
                    .error_message
                    .unwrap_or_else(|| "branch failed".to_string()),
            ));
        }
        Ok(CommandOutcome {
            output: result.output,
            data: result.result,
            status: result.status,
        })
    }

    /// Structured loop/stop conditions. `negate` flips any of them.
    async fn evaluate_condition(
        &self,
        condition: &Value,
        ctx: &ExecutionContext,
    ) -> Result<bool> {
        let verdict = match condition.get("kind").and_then(Value::as_str) {
            None | Some("always") => true,
            Some("variable_equals") => {
                let variable = require_str("condition", condition, "variable")?;
                let expected = condition.get("value").cloned().unwrap_or(Value::Null);
                ctx.variables.get(variable).unwrap_or(Value::Null) == expected
            }
            Some("variable_contains") => {
                let variable = require_str("condition", condition, "variable")?;
                let needle = require_str("condition", condition, "value")?;
                match ctx.variables.get(variable) {
                    Some(Value::String(s)) => s.contains(needle),
                    Some(other) => other.to_string().contains(needle),
                    None => false,
                }
            }
            Some("window_exists") => {
                let title = require_str("condition", condition, "title_contains")?;
                let snapshot = capture_snapshot(self.adapter.as_ref()).await;
                snapshot.windows.iter().any(|w| w.title.contains(title))
            }
            Some(other) => {
                return Err(EngineError::InvalidInput(format!(
                    "unknown condition kind: {other}"
                )));
            }
        };
        let negate = condition
            .get("negate")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(verdict != negate)
    }

    async fn run_script_command(
        &self,
        params: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<CommandOutcome> {
        let script_path = require_str("EXECUTE_SCRIPT", params, "script_path")?.to_string();
        let continue_on_failure = params
            .get("continue_on_failure")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let result_variable = params
            .get("result_variable")
            .and_then(Value::as_str)
            .map(str::to_string);

        let script_result = self.execute_script_file(&script_path, ctx).await;

        match script_result {
            Ok(result) => {
                if let Some(variable) = result_variable {
                    ctx.variables.set(variable, json!(result.output));
                }
                Ok(CommandOutcome {
                    output: result.output,
                    data: result.result,
                    status: ExecutionStatus::Completed,
                })
            }
            Err(e) => {
                if let Some(variable) = result_variable {
                    ctx.variables
                        .set(variable, json!({"success": false, "error": e.to_string()}));
                }
                if continue_on_failure {
                    warn!(script_path = %script_path, "script failed but sequence continues: {e}");
                    Ok(CommandOutcome::done(
                        format!("script failed: {e}"),
                        Value::Null,
                    ))
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Nested script execution: nesting cap, cycle check against the script
    /// stack, parent-wins variable merge, guaranteed stack pop.
    pub async fn execute_script_file(
        &self,
        script_path: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<TaskExecutionResult> {
        if ctx.nesting() >= ctx.max_nesting {
            return Err(EngineError::MaxNestingExceeded {
                depth: ctx.nesting(),
                max: ctx.max_nesting,
            });
        }

        let resolved = self.scripts.resolve(script_path)?;
        if ctx.script_stack.iter().any(|p| p == &resolved) {
            return Err(EngineError::CircularScriptDependency(resolved));
        }

        let script = self.scripts.load(&resolved)?;
        if let Some(variables) = &script.variables {
            ctx.variables.merge_missing(variables);
        }

        info!(script_path = %resolved.display(), depth = ctx.nesting() + 1, "executing script");
        ctx.log(format!("script start: {}", resolved.display()));
        ctx.script_stack.push(resolved.clone());
        let result = self.sequence_boxed(&script.commands, ctx).await;
        ctx.script_stack.pop();
        ctx.log(format!("script end: {}", resolved.display()));

        if let Some(result_variable) = &script.result_variable {
            let value = if result.success {
                json!(result.output)
            } else {
                json!({"success": false, "error": result.error_message})
            };
            ctx.sub_script_results.insert(result_variable.clone(), value);
        }

        if result.success {
            Ok(result)
        } else {
            Err(EngineError::AdapterFailure(
                result
                    .error_message
                    .unwrap_or_else(|| format!("script failed: {}", resolved.display())),
            ))
        }
    }

    fn sequence_boxed<'a>(
        &'a self,
        commands: &'a [Command],
        ctx: &'a mut ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = TaskExecutionResult> + Send + 'a>> {
        Box::pin(self.execute_command_sequence(commands, ctx))
    }

    /// Consume hints written by the feedback controller: an outstanding wait
    /// is honored and cleared here; `retry_required` and `find_alternative`
    /// stay in the variables for the planner and scripts to read.
    async fn consume_adaptation_hints(&self, ctx: &mut ExecutionContext) {
        self.feedback.apply_pending_hints(ctx);
        if ctx.variables.get("wait_required") == Some(json!(true)) {
            let wait_ms = ctx
                .variables
                .get("wait_duration_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(1000);
            debug!(wait_ms, "honoring wait hint before next command");
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            ctx.variables.remove("wait_required");
            ctx.variables.remove("wait_duration_ms");
        }
    }

    fn is_cancelled(&self, request_id: &str) -> bool {
        self.cancelled.lock().unwrap().contains(request_id)
    }
}

fn missing(command: &str, parameter: &str) -> EngineError {
    EngineError::MissingParameter {
        command: command.to_string(),
        parameter: parameter.to_string(),
    }
}

fn require_str<'v>(command: &str, params: &'v Value, parameter: &str) -> Result<&'v str> {
    params
        .get(parameter)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(command, parameter))
}

fn require_i64(command: &str, params: &Value, parameter: &str) -> Result<i64> {
    params
        .get(parameter)
        .and_then(Value::as_i64)
        .ok_or_else(|| missing(command, parameter))
}

/// Replace `${name}` placeholders with values from the variable snapshot.
/// Non-string values are JSON-serialized; unknown names stay literal.
/// A pure function of its inputs.
pub fn substitute(input: &str, variables: &HashMap<String, Value>) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match variables.get(name) {
                    Some(Value::String(s)) => output.push_str(s),
                    Some(other) => output.push_str(&other.to_string()),
                    None => {
                        output.push_str("${");
                        output.push_str(name);
                        output.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                output.push_str("${");
                rest = after;
            }
        }
    }
    output.push_str(rest);
    output
}

/// Apply [`substitute`] recursively through strings inside objects and
/// arrays.
pub fn substitute_value(value: &Value, variables: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(s, variables)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, variables))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitutes_known_names() {
        let variables = vars(&[("name", json!("Alice"))]);
        assert_eq!(substitute("hi ${name}", &variables), "hi Alice");
        assert_eq!(substitute("${name}${name}", &variables), "AliceAlice");
    }

    #[test]
    fn unknown_names_stay_literal() {
        let variables = vars(&[]);
        assert_eq!(substitute("hi ${name}", &variables), "hi ${name}");
    }

    #[test]
    fn non_string_values_are_json_serialized() {
        let variables = vars(&[("count", json!(3)), ("flags", json!({"a": true}))]);
        assert_eq!(substitute("n=${count}", &variables), "n=3");
        assert_eq!(substitute("f=${flags}", &variables), r#"f={"a":true}"#);
    }

    #[test]
    fn unterminated_placeholder_is_left_alone() {
        let variables = vars(&[("name", json!("Alice"))]);
        assert_eq!(substitute("hi ${name", &variables), "hi ${name");
    }

    #[test]
    fn substitution_with_no_placeholders_is_identity() {
        let variables = vars(&[]);
        assert_eq!(substitute("plain text", &variables), "plain text");
    }

    #[test]
    fn substitution_recurses_through_parameters() {
        let variables = vars(&[("target", json!("notepad"))]);
        let params = json!({
            "title": "${target}",
            "nested": {"text": "open ${target}"},
            "list": ["${target}", 7],
        });
        let substituted = substitute_value(&params, &variables);
        assert_eq!(substituted["title"], "notepad");
        assert_eq!(substituted["nested"]["text"], "open notepad");
        assert_eq!(substituted["list"][0], "notepad");
        assert_eq!(substituted["list"][1], 7);
    }
}
