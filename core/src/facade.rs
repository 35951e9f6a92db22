//! The orchestrator facade: owns the subsystems, schedules requests on a
//! worker task behind an admission gate, and exposes the public surface
//! (submit, execute plan/script, query status, pause/resume/cancel,
//! emergency stop).
//!
//! Per-request event order: USER_REQUEST → EXECUTION_STARTED →
//! COMMAND_EXECUTED* → {TASK_COMPLETED | TASK_FAILED | EMERGENCY_STOP}, with
//! ERROR_OCCURRED interleaved after failed attempts inside the recovery
//! envelope.

// Poisoned locks should fail the program.
#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::adapter::OsAdapter;
use crate::adapter::capture_snapshot;
use crate::config::Config;
use crate::conversation::ConversationManager;
use crate::engine::EngineSettings;
use crate::engine::ExecutionEngine;
use crate::error::EngineError;
use crate::events::EventBus;
use crate::events::EventListener;
use crate::feedback::FeedbackController;
use crate::parser::CommandParser;
use crate::planner::PlannerTransport;
use crate::resources::ResourceMonitor;
use crate::scripts::ScriptManager;
use crate::scripts::validate_plan_value;
use crate::state::ExecutionContext;
use crate::state::StateStore;
use crate::ui::UserInterface;
use deskpilot_protocol::ExecutionStatus;
use deskpilot_protocol::OrchestratorEvent;
use deskpilot_protocol::Plan;
use deskpilot_protocol::TaskExecutionResult;

/// External collaborators wired in at construction time. Only the OS adapter
/// is mandatory; the pipeline works without a parser, planner or UI.
pub struct Collaborators {
    pub adapter: Arc<dyn OsAdapter>,
    pub planner: Option<Arc<dyn PlannerTransport>>,
    pub parser: Option<Arc<dyn CommandParser>>,
    pub ui: Option<Arc<dyn UserInterface>>,
}

/// Unbounded FIFO of request ids feeding the worker.
struct RequestQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl RequestQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, request_id: String) {
        self.items.lock().unwrap().push_back(request_id);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<String> {
        self.items.lock().unwrap().pop_front()
    }

    fn remove(&self, request_id: &str) -> bool {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|id| id != request_id);
        items.len() != before
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    fn drain(&self) {
        self.items.lock().unwrap().clear();
    }
}

pub struct Orchestrator {
    config: Config,
    adapter: Arc<dyn OsAdapter>,
    parser: Option<Arc<dyn CommandParser>>,
    state: Arc<StateStore>,
    events: Arc<EventBus>,
    scripts: Arc<ScriptManager>,
    feedback: Arc<FeedbackController>,
    conversations: Arc<ConversationManager>,
    engine: Arc<ExecutionEngine>,
    resources: Arc<ResourceMonitor>,
    queue: Arc<RequestQueue>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    emergency_stop_latch: Arc<AtomicBool>,
    cancelled: Arc<Mutex<HashSet<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build the subsystems and start the worker (and, when enabled, the
    /// feedback monitor). Must be called within a tokio runtime.
    pub fn spawn(config: Config, collaborators: Collaborators) -> Arc<Self> {
        let Collaborators {
            adapter,
            planner,
            parser,
            ui,
        } = collaborators;

        let events = Arc::new(EventBus::new(
            config.events.history_enabled,
            config.events.max_history,
        ));
        let state = Arc::new(StateStore::new(
            config.orchestrator.max_completed_executions,
            config.orchestrator.activity_log_size,
            config.scripts.max_nesting,
        ));
        let scripts = Arc::new(ScriptManager::new(
            config.scripts.scripts_root.clone(),
            config.scripts.max_nesting,
            config.scripts.cache_enabled,
        ));
        let feedback = Arc::new(FeedbackController::new(
            Arc::clone(&adapter),
            planner.clone(),
            Arc::clone(&events),
            config.feedback.environment_check_interval_ms,
            config.feedback.max_environment_history,
        ));
        feedback.install_default_rules();
        let conversations = Arc::new(ConversationManager::new(
            planner,
            Arc::clone(&adapter),
            ui,
            Arc::clone(&events),
            config.conversation.clone(),
        ));
        let emergency_stop_latch = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(Mutex::new(HashSet::new()));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&adapter),
            Arc::clone(&scripts),
            Arc::clone(&feedback),
            Arc::clone(&events),
            Arc::clone(&emergency_stop_latch),
            Arc::clone(&cancelled),
            EngineSettings {
                execution_timeout_ms: config.orchestrator.execution_timeout_ms,
                command_sequence_delay_ms: config.orchestrator.command_sequence_delay_ms,
                max_loop_iterations: config.orchestrator.max_loop_iterations,
            },
        ));
        let resources = Arc::new(ResourceMonitor::new(config.resources.enabled));

        let orchestrator = Arc::new(Self {
            config,
            adapter,
            parser,
            state,
            events,
            scripts,
            feedback,
            conversations,
            engine,
            resources,
            queue: Arc::new(RequestQueue::new()),
            running: Arc::new(AtomicBool::new(true)),
            paused: Arc::new(AtomicBool::new(false)),
            emergency_stop_latch,
            cancelled,
            worker: Mutex::new(None),
        });

        if orchestrator.config.feedback.enabled {
            FeedbackController::start(&orchestrator.feedback);
        }

        let worker = tokio::spawn(worker_loop(Arc::downgrade(&orchestrator)));
        *orchestrator.worker.lock().unwrap() = Some(worker);
        info!("orchestrator started");
        orchestrator
    }

    // ------------------------------------------------------------------
    // Public surface
    // ------------------------------------------------------------------

    /// Queue a user request for asynchronous processing; returns its id.
    pub fn submit(&self, user_input: &str) -> String {
        let request_id = self.state.create_request(user_input);
        self.events
            .raise_for_request(OrchestratorEvent::UserRequest, user_input, &request_id);
        self.queue.push(request_id.clone());
        request_id
    }

    /// Process a user request to completion and return its result.
    pub async fn process_user_request(&self, user_input: &str) -> TaskExecutionResult {
        let request_id = self.state.create_request(user_input);
        self.events
            .raise_for_request(OrchestratorEvent::UserRequest, user_input, &request_id);
        self.run_request(&request_id).await
    }

    /// Execute a plan document (accepts `commands` or `sequence`).
    pub async fn execute_plan(&self, plan: &Value) -> TaskExecutionResult {
        let request_id = self.state.create_request("Execute plan");
        self.events
            .raise_for_request(OrchestratorEvent::UserRequest, "Execute plan", &request_id);

        if let Err(e) = validate_plan_value(plan) {
            return self.fail_before_start(&request_id, e);
        }
        let parsed: Plan = match serde_json::from_value(plan.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                return self
                    .fail_before_start(&request_id, EngineError::InvalidPlan(e.to_string()));
            }
        };

        let Some(mut ctx) = self.begin(&request_id).await else {
            return self.resource_refusal(&request_id);
        };
        if let Some(variables) = &parsed.variables {
            ctx.variables.merge_missing(variables);
        }
        let result = self.execute_with_recovery_if_enabled(parsed, &mut ctx).await;
        self.finish(ctx, result).await
    }

    /// Execute a script from the trusted scripts root.
    pub async fn execute_script_file(&self, script_path: &str) -> TaskExecutionResult {
        let request_id = self
            .state
            .create_request(&format!("Execute script: {script_path}"));
        self.events.raise_for_request(
            OrchestratorEvent::UserRequest,
            format!("Execute script: {script_path}"),
            &request_id,
        );

        let Some(mut ctx) = self.begin(&request_id).await else {
            return self.resource_refusal(&request_id);
        };
        let result = match self.engine.execute_script_file(script_path, &mut ctx).await {
            Ok(result) => result,
            Err(e) => TaskExecutionResult::failed(&request_id, e.to_string()),
        };
        self.finish(ctx, result).await
    }

    pub fn result(&self, request_id: &str) -> Option<TaskExecutionResult> {
        self.state.result(request_id)
    }

    pub fn active_requests(&self) -> Vec<String> {
        self.state.active_requests()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.events
            .raise_simple(OrchestratorEvent::ExecutionPaused, "execution paused");
        info!("execution paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.queue.notify.notify_waiters();
        self.events
            .raise_simple(OrchestratorEvent::ExecutionResumed, "execution resumed");
        info!("execution resumed");
    }

    /// Cancel a request. Queued requests are removed and marked Cancelled;
    /// in-flight requests finish their current command and stop at the next
    /// boundary. A no-op for requests that already have a result.
    pub fn cancel(&self, request_id: &str) {
        if self.state.has_result(request_id) {
            return;
        }
        if self.queue.remove(request_id) {
            let result = TaskExecutionResult {
                execution_id: request_id.to_string(),
                status: ExecutionStatus::Cancelled,
                success: false,
                error_message: Some("execution cancelled by user".to_string()),
                ..Default::default()
            };
            if let Err(e) = self.state.mark_complete(request_id, result) {
                warn!(request_id, "failed to record cancellation: {e}");
            }
            self.state
                .log_activity(&format!("cancelled queued request: {request_id}"));
            return;
        }
        self.cancelled
            .lock()
            .unwrap()
            .insert(request_id.to_string());
        self.state
            .log_activity(&format!("cancelled in-flight request: {request_id}"));
    }

    /// Drain the queue and latch the stop flag observed at every command
    /// boundary. Idempotent.
    pub fn emergency_stop(&self) {
        if self.emergency_stop_latch.swap(true, Ordering::SeqCst) {
            return;
        }
        self.paused.store(true, Ordering::SeqCst);
        self.queue.drain();
        self.events
            .raise_simple(OrchestratorEvent::EmergencyStop, "emergency stop activated");
        error!("emergency stop activated");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.emergency_stop_latch.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.queue.len() == 0 && self.state.active_count() == 0
    }

    pub fn status(&self) -> Value {
        json!({
            "is_running": self.is_running(),
            "is_paused": self.is_paused(),
            "emergency_stop": self.emergency_stop_latch.load(Ordering::SeqCst),
            "queued_requests": self.queue.len(),
            "active_requests": self.state.active_requests(),
            "active_conversations": self.conversations.active_count(),
            "feedback_monitoring": self.feedback.is_monitoring(),
            "success_metrics": self.feedback.success_metrics(),
        })
    }

    pub fn add_event_listener(&self, listener: EventListener) {
        self.events.add_listener(listener);
    }

    /// Deliver a user's answer to a pending interaction.
    pub fn provide_user_response(&self, interaction_id: &str, response: Value) -> bool {
        self.conversations.provide_response(interaction_id, response)
    }

    pub fn recent_activity(&self) -> Vec<String> {
        self.state.recent_activity()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn scripts(&self) -> &Arc<ScriptManager> {
        &self.scripts
    }

    pub fn feedback(&self) -> &Arc<FeedbackController> {
        &self.feedback
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    pub fn resources(&self) -> &Arc<ResourceMonitor> {
        &self.resources
    }

    /// Stop the worker and the feedback monitor, then sweep conversations.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("shutting down orchestrator");
        self.queue.notify.notify_waiters();
        self.feedback.stop().await;
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!("worker task ended abnormally: {e}");
        }
        self.conversations.cleanup_expired();
        info!("orchestrator shutdown complete");
    }

    // ------------------------------------------------------------------
    // Request pipeline
    // ------------------------------------------------------------------

    /// Full pipeline for a created request: parse, plan, execute, publish.
    async fn run_request(&self, request_id: &str) -> TaskExecutionResult {
        let Some(mut ctx) = self.begin(request_id).await else {
            return self.resource_refusal(request_id);
        };

        let result = self.process_request_internal(&mut ctx).await;
        self.finish(ctx, result).await
    }

    async fn process_request_internal(&self, ctx: &mut ExecutionContext) -> TaskExecutionResult {
        let request_id = ctx.request_id.clone();
        let user_input = ctx.original_request.clone();

        // Step 1: parse, when a parser is configured.
        if let Some(parser) = &self.parser {
            match parser.parse(&user_input) {
                Ok(parsed) => {
                    if !parsed.commands.is_empty() {
                        let commands = match serde_json::to_value(&parsed.commands) {
                            Ok(commands) => commands,
                            Err(e) => {
                                return TaskExecutionResult::failed(&request_id, e.to_string());
                            }
                        };
                        ctx.variables.set("parsed_commands", commands);
                    }
                    ctx.variables.set(
                        "intent",
                        json!({
                            "kind": parsed.intent.kind,
                            "confidence": parsed.intent.confidence,
                        }),
                    );
                }
                Err(e) => {
                    return TaskExecutionResult::failed(&request_id, e.to_string());
                }
            }
        }

        // Step 2: plan generation.
        if let Some(parsed_commands) = ctx.variables.get("parsed_commands") {
            ctx.variables
                .set("execution_plan", json!({"commands": parsed_commands}));
        } else {
            let wait = Duration::from_millis(self.config.conversation.plan_wait_timeout_ms);
            match tokio::time::timeout(wait, self.conversations.initiate(&user_input, ctx)).await {
                Ok(Ok((conversation_id, Some(_)))) => {
                    debug!(
                        conversation_id = %conversation_id,
                        request_id = %request_id,
                        "plan produced by conversation"
                    );
                }
                Ok(Ok((_, None))) => {
                    return TaskExecutionResult::failed(
                        &request_id,
                        "no execution plan generated",
                    );
                }
                Ok(Err(e)) => {
                    return TaskExecutionResult::failed(&request_id, e.to_string());
                }
                Err(_) => {
                    return TaskExecutionResult::failed(
                        &request_id,
                        "timed out waiting for execution plan",
                    );
                }
            }
        }

        // Step 3: execute.
        let Some(plan_json) = ctx.variables.get("execution_plan") else {
            return TaskExecutionResult::failed(&request_id, "no execution plan generated");
        };
        if let Err(e) = validate_plan_value(&plan_json) {
            return TaskExecutionResult::failed(&request_id, e.to_string());
        }
        let plan: Plan = match serde_json::from_value(plan_json) {
            Ok(plan) => plan,
            Err(e) => return TaskExecutionResult::failed(&request_id, e.to_string()),
        };
        self.execute_with_recovery_if_enabled(plan, ctx).await
    }

    async fn execute_with_recovery_if_enabled(
        &self,
        plan: Plan,
        ctx: &mut ExecutionContext,
    ) -> TaskExecutionResult {
        if self.config.orchestrator.error_recovery_enabled {
            self.execute_with_error_recovery(plan, ctx).await
        } else {
            self.engine.execute_command_sequence(&plan.commands, ctx).await
        }
    }

    /// Retry envelope: execute, and on failure ask the planner for a
    /// recovery plan, sleep, retry, up to `max_error_retries` times.
    async fn execute_with_error_recovery(
        &self,
        mut plan: Plan,
        ctx: &mut ExecutionContext,
    ) -> TaskExecutionResult {
        let max_retries = self.config.orchestrator.max_error_retries;
        let mut attempt = 0u32;

        loop {
            let result = self.engine.execute_command_sequence(&plan.commands, ctx).await;
            if result.success
                || result.status == ExecutionStatus::Cancelled
                || self.emergency_stop_latch.load(Ordering::SeqCst)
            {
                return result;
            }

            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| "execution failed".to_string());
            self.events.raise_for_request(
                OrchestratorEvent::ErrorOccurred,
                message.clone(),
                &ctx.request_id,
            );
            ctx.variables.set("last_error", json!(message));
            let error_count = ctx
                .variables
                .get("error_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            ctx.variables.set("error_count", json!(error_count + 1));

            if attempt >= max_retries {
                return result;
            }

            warn!(
                request_id = %ctx.request_id,
                attempt = attempt + 1,
                max_retries,
                "execution failed, attempting recovery"
            );
            match self.conversations.recover(&message, ctx).await {
                Ok(recovery_plan) => {
                    match serde_json::to_value(&recovery_plan) {
                        Ok(plan_json) => ctx.variables.set("execution_plan", plan_json),
                        Err(e) => warn!("failed to record recovery plan: {e}"),
                    }
                    plan = recovery_plan;
                }
                Err(e) => {
                    warn!(request_id = %ctx.request_id, "error recovery unavailable: {e}");
                    return result;
                }
            }

            tokio::time::sleep(Duration::from_millis(
                self.config.orchestrator.error_recovery_delay_ms,
            ))
            .await;
            attempt += 1;
        }
    }

    // ------------------------------------------------------------------
    // Execution envelope
    // ------------------------------------------------------------------

    /// Gate on resource thresholds, mark the request active and take
    /// exclusive ownership of its context. `None` means the resource gate
    /// refused to start.
    async fn begin(&self, request_id: &str) -> Option<ExecutionContext> {
        if let Some(violation) = self.resources.check_thresholds(&self.config.resources) {
            self.events.raise_for_request(
                OrchestratorEvent::ErrorOccurred,
                format!("resource thresholds exceeded: {violation}"),
                request_id,
            );
            error!(request_id, violation = %violation, "refusing to start execution");
            return None;
        }
        self.resources.log_metrics();

        if let Err(e) = self.state.mark_active(request_id) {
            error!(request_id, "failed to mark request active: {e}");
            return None;
        }
        self.events.raise_for_request(
            OrchestratorEvent::ExecutionStarted,
            "execution started",
            request_id,
        );

        let mut ctx = match self.state.checkout(request_id) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(request_id, "failed to borrow context: {e}");
                return None;
            }
        };
        ctx.current_environment = Some(capture_snapshot(self.adapter.as_ref()).await);
        Some(ctx)
    }

    /// Return the context, publish the result and emit the terminal event.
    async fn finish(
        &self,
        ctx: ExecutionContext,
        mut result: TaskExecutionResult,
    ) -> TaskExecutionResult {
        let request_id = ctx.request_id.clone();
        let was_cancelled = self.cancelled.lock().unwrap().remove(&request_id);
        if was_cancelled && !result.success {
            result.status = ExecutionStatus::Cancelled;
        }
        result.execution_id = request_id.clone();

        self.state.checkin(ctx);
        if let Err(e) = self.state.mark_complete(&request_id, result.clone()) {
            error!(request_id, "failed to publish result: {e}");
        }
        self.resources.log_metrics();

        if result.success {
            self.events.raise_for_request(
                OrchestratorEvent::TaskCompleted,
                "request completed",
                &request_id,
            );
        } else if !self.emergency_stop_latch.load(Ordering::SeqCst) {
            self.events.raise_for_request(
                OrchestratorEvent::TaskFailed,
                result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "request failed".to_string()),
                &request_id,
            );
        }
        result
    }

    fn resource_refusal(&self, request_id: &str) -> TaskExecutionResult {
        let result = TaskExecutionResult::failed(
            request_id,
            EngineError::ResourceExhausted("configured thresholds exceeded".to_string())
                .to_string(),
        );
        if let Err(e) = self.state.mark_complete(request_id, result.clone()) {
            warn!(request_id, "failed to record refusal: {e}");
        }
        result
    }

    fn fail_before_start(&self, request_id: &str, error: EngineError) -> TaskExecutionResult {
        let result = TaskExecutionResult::failed(request_id, error.to_string());
        if let Err(e) = self.state.mark_complete(request_id, result.clone()) {
            warn!(request_id, "failed to record validation failure: {e}");
        }
        self.events.raise_for_request(
            OrchestratorEvent::TaskFailed,
            result
                .error_message
                .clone()
                .unwrap_or_else(|| "invalid plan".to_string()),
            request_id,
        );
        result
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().unwrap().take() {
            worker.abort();
        }
    }
}

/// One dedicated worker pulls request ids from the FIFO. The concurrency cap
/// acts as an admission gate: at cap, the worker backs off for
/// `main_loop_delay_ms` and re-checks. The worker holds only a weak
/// reference so dropping the orchestrator ends the loop.
async fn worker_loop(weak: Weak<Orchestrator>) {
    info!("worker started");

    loop {
        let Some(orchestrator) = weak.upgrade() else {
            break;
        };
        if !orchestrator.running.load(Ordering::SeqCst) {
            break;
        }
        let delay =
            Duration::from_millis(orchestrator.config.orchestrator.main_loop_delay_ms.max(1));

        if orchestrator.paused.load(Ordering::SeqCst) {
            tokio::select! {
                _ = orchestrator.queue.notify.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            continue;
        }

        if orchestrator.state.active_count() >= orchestrator.config.orchestrator.max_concurrent_tasks
        {
            tokio::time::sleep(delay).await;
            continue;
        }

        let Some(request_id) = orchestrator.queue.pop() else {
            tokio::select! {
                _ = orchestrator.queue.notify.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            continue;
        };

        if orchestrator.state.has_result(&request_id) {
            // Cancelled while queued.
            continue;
        }
        debug!(request_id = %request_id, "worker picked up request");
        orchestrator.run_request(&request_id).await;
    }
    info!("worker stopped");
}
