//! Multi-turn dialogues with the planner: requesting missing environmental
//! data, asking the user for input mid-workflow, and producing recovery plans
//! after failures.
//!
//! A conversation is scoped to a single request and bounded by `max_turns`
//! and an inactivity expiration. User interactions resolve through oneshot
//! channels so a waiting turn wakes immediately when the answer arrives,
//! bounded by the configured timeout.

// Poisoned locks should fail the program.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;
use serde_json::Value;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::adapter::OsAdapter;
use crate::config::ConversationConfig;
use crate::error::EngineError;
use crate::error::Result;
use crate::events::EventBus;
use crate::planner::PlannerTransport;
use crate::state::ExecutionContext;
use crate::ui::UserInterface;
use deskpilot_protocol::Command;
use deskpilot_protocol::EnvironmentalDataRequest;
use deskpilot_protocol::InputKind;
use deskpilot_protocol::OrchestratorEvent;
use deskpilot_protocol::Plan;
use deskpilot_protocol::PlannerResponse;
use deskpilot_protocol::UserInteractionSpec;

pub struct ConversationState {
    pub id: String,
    pub request_id: String,
    pub original_request: String,
    pub history: Vec<Value>,
    pub context: serde_json::Map<String, Value>,
    pub turn: u32,
    pub max_turns: u32,
    pub awaiting_response: bool,
    pub requires_env_update: bool,
    pub last_interaction: Instant,
}

struct PendingInteraction {
    conversation_id: String,
    spec: UserInteractionSpec,
    deadline: Instant,
    responder: Option<oneshot::Sender<Value>>,
}

pub struct ConversationManager {
    planner: Option<Arc<dyn PlannerTransport>>,
    adapter: Arc<dyn OsAdapter>,
    ui: Option<Arc<dyn UserInterface>>,
    events: Arc<EventBus>,
    config: ConversationConfig,
    conversations: Mutex<HashMap<String, ConversationState>>,
    interactions: Mutex<HashMap<String, PendingInteraction>>,
}

impl ConversationManager {
    pub fn new(
        planner: Option<Arc<dyn PlannerTransport>>,
        adapter: Arc<dyn OsAdapter>,
        ui: Option<Arc<dyn UserInterface>>,
        events: Arc<EventBus>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            planner,
            adapter,
            ui,
            events,
            config,
            conversations: Mutex::new(HashMap::new()),
            interactions: Mutex::new(HashMap::new()),
        }
    }

    fn planner(&self) -> Result<&Arc<dyn PlannerTransport>> {
        self.planner.as_ref().ok_or(EngineError::PlannerUnavailable)
    }

    /// Open a conversation for `user_input`, drive it until the planner
    /// produces commands, needs nothing further, or the turn limit is hit.
    /// Returns the commands of the final turn, if any; they are also
    /// published into `ctx.variables["execution_plan"]`.
    pub async fn initiate(
        &self,
        user_input: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<(String, Option<Vec<Command>>)> {
        let planner = self.planner()?;
        let conversation_id = format!("CONV-{}", Uuid::new_v4());

        {
            let mut conversations = self.conversations.lock().unwrap();
            let mut context = serde_json::Map::new();
            context.insert("user_request".to_string(), json!(user_input));
            context.insert(
                "environment".to_string(),
                serde_json::to_value(&ctx.current_environment).unwrap_or(Value::Null),
            );
            context.insert(
                "execution_context".to_string(),
                json!({
                    "request_id": ctx.request_id,
                    "variables": ctx.variables.snapshot(),
                }),
            );
            conversations.insert(
                conversation_id.clone(),
                ConversationState {
                    id: conversation_id.clone(),
                    request_id: ctx.request_id.clone(),
                    original_request: user_input.to_string(),
                    history: vec![history_message("user", json!(user_input))],
                    context,
                    turn: 0,
                    max_turns: self.config.max_turns,
                    awaiting_response: false,
                    requires_env_update: false,
                    last_interaction: Instant::now(),
                },
            );
        }
        info!(conversation_id = %conversation_id, request_id = %ctx.request_id, "initiated conversation");

        let prompt = self.build_prompt(&conversation_id, user_input)?;
        self.set_awaiting(&conversation_id, true);
        let response = planner.send_prompt(prompt).await?;
        let commands = self.drive(&conversation_id, response, ctx).await?;
        Ok((conversation_id, commands))
    }

    /// Open a recovery conversation after a failed execution and ask the
    /// planner for a `recovery_plan`.
    pub async fn recover(
        &self,
        error_message: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<Plan> {
        let planner = self.planner()?;
        let description = format!(
            "The previous command sequence failed: {error_message}. Original request: {}",
            ctx.original_request
        );
        let (conversation_id, _) = self.initiate(&description, ctx).await?;

        let prompt = {
            let conversations = self.conversations.lock().unwrap();
            let state = conversations
                .get(&conversation_id)
                .ok_or_else(|| conversation_not_found(&conversation_id))?;
            json!({
                "type": "generate_recovery_plan",
                "conversation_history": state.history,
                "current_context": state.context,
                "original_request": state.original_request,
            })
        };
        let response = planner.send_prompt(prompt).await?;
        let parsed = PlannerResponse::parse(&response)?;
        let plan = parsed.recovery_plan.ok_or_else(|| {
            EngineError::InvalidPlan("planner response carried no recovery_plan".to_string())
        })?;
        if plan.commands.is_empty() {
            return Err(EngineError::InvalidPlan("recovery plan is empty".to_string()));
        }
        self.touch(&conversation_id);
        Ok(plan)
    }

    /// Ask the planner for alternatives to a failed command.
    pub async fn suggest_alternatives(
        &self,
        conversation_id: &str,
        failed_command: &Value,
    ) -> Result<Vec<Value>> {
        let planner = self.planner()?;
        let prompt = {
            let conversations = self.conversations.lock().unwrap();
            let state = conversations
                .get(conversation_id)
                .ok_or_else(|| conversation_not_found(conversation_id))?;
            json!({
                "type": "suggest_alternatives",
                "failed_command": failed_command,
                "conversation_history": state.history,
                "current_environment": state.context.get("environment"),
            })
        };
        let response = planner.send_prompt(prompt).await?;
        let parsed = PlannerResponse::parse(&response)?;
        Ok(parsed.alternatives.unwrap_or_default())
    }

    /// Drive turns until the conversation yields commands or terminates.
    async fn drive(
        &self,
        conversation_id: &str,
        mut response: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Option<Vec<Command>>> {
        loop {
            let (parsed, turn_limit_reached) = {
                let mut conversations = self.conversations.lock().unwrap();
                let state = conversations
                    .get_mut(conversation_id)
                    .ok_or_else(|| conversation_not_found(conversation_id))?;
                state.awaiting_response = false;
                state.requires_env_update = false;
                state.last_interaction = Instant::now();
                state.turn += 1;
                push_history(
                    state,
                    history_message("assistant", response.clone()),
                    self.config.max_history_entries,
                );
                (
                    PlannerResponse::parse(&response)?,
                    state.turn >= state.max_turns,
                )
            };

            if !parsed.is_actionable() {
                self.finalize(conversation_id, ctx, false);
                return Err(EngineError::InvalidInput(
                    "planner response carried no commands, request or message".to_string(),
                ));
            }

            if let Some(request) = parsed.environmental_data_request {
                let data = self.gather_environment_data(&request).await;
                {
                    let mut conversations = self.conversations.lock().unwrap();
                    if let Some(state) = conversations.get_mut(conversation_id) {
                        state.context.insert("environment".to_string(), data);
                        state.requires_env_update = true;
                    }
                }
                if turn_limit_reached {
                    self.finalize(conversation_id, ctx, false);
                    return Ok(None);
                }
                let prompt = self.build_prompt(conversation_id, "environment data updated")?;
                self.set_awaiting(conversation_id, true);
                response = self.planner()?.send_prompt(prompt).await?;
                continue;
            }

            if let Some(spec) = parsed.user_interaction_request {
                let (interaction_id, receiver) = self.request_user_input(conversation_id, spec);
                self.events.raise_for_request(
                    OrchestratorEvent::UserInteractionRequired,
                    format!("interaction {interaction_id} pending"),
                    &ctx.request_id,
                );
                let answer = self
                    .wait_for_response(&interaction_id, receiver, self.config.user_input_timeout_ms)
                    .await?;
                self.events.raise_for_request(
                    OrchestratorEvent::UserInteractionReceived,
                    format!("interaction {interaction_id} answered"),
                    &ctx.request_id,
                );
                {
                    let mut conversations = self.conversations.lock().unwrap();
                    if let Some(state) = conversations.get_mut(conversation_id) {
                        push_history(
                            state,
                            history_message("user", answer.clone()),
                            self.config.max_history_entries,
                        );
                        state.context.insert("user_response".to_string(), answer);
                    }
                }
                if turn_limit_reached {
                    self.finalize(conversation_id, ctx, false);
                    return Ok(None);
                }
                let prompt = self.build_prompt(conversation_id, "user provided input")?;
                self.set_awaiting(conversation_id, true);
                response = self.planner()?.send_prompt(prompt).await?;
                continue;
            }

            if let Some(commands) = parsed.command_list() {
                if commands.is_empty() {
                    self.finalize(conversation_id, ctx, false);
                    return Err(EngineError::InvalidPlan(
                        "planner produced an empty command list".to_string(),
                    ));
                }
                let commands = commands.to_vec();
                let plan = Plan::from_commands(commands.clone());
                let plan_json = serde_json::to_value(&plan)?;
                {
                    let mut conversations = self.conversations.lock().unwrap();
                    if let Some(state) = conversations.get_mut(conversation_id) {
                        state
                            .context
                            .insert("execution_plan".to_string(), plan_json.clone());
                    }
                }
                ctx.variables.set("execution_plan", plan_json);
                self.finalize(conversation_id, ctx, true);
                return Ok(Some(commands));
            }

            // Message-only turn: nothing further to wait on.
            debug!(conversation_id, "conversation ended on a message-only turn");
            self.finalize(conversation_id, ctx, false);
            return Ok(None);
        }
    }

    /// Whether the conversation would continue another turn: below the turn
    /// limit and something is still outstanding.
    pub fn should_continue(&self, conversation_id: &str) -> bool {
        let conversations = self.conversations.lock().unwrap();
        let Some(state) = conversations.get(conversation_id) else {
            return false;
        };
        if state.turn >= state.max_turns {
            return false;
        }
        state.awaiting_response
            || state.requires_env_update
            || self.has_pending_interactions(conversation_id)
    }

    fn has_pending_interactions(&self, conversation_id: &str) -> bool {
        self.interactions
            .lock()
            .unwrap()
            .values()
            .any(|pending| pending.conversation_id == conversation_id)
    }

    fn finalize(&self, conversation_id: &str, ctx: &mut ExecutionContext, success: bool) {
        let conversations = self.conversations.lock().unwrap();
        if let Some(state) = conversations.get(conversation_id) {
            info!(conversation_id, turns = state.turn, "finalizing conversation");
            ctx.variables.set(
                "conversation_result",
                json!({
                    "success": success,
                    "turns": state.turn,
                    "conversation_id": conversation_id,
                }),
            );
        }
    }

    fn build_prompt(&self, conversation_id: &str, instruction_context: &str) -> Result<Value> {
        let conversations = self.conversations.lock().unwrap();
        let state = conversations
            .get(conversation_id)
            .ok_or_else(|| conversation_not_found(conversation_id))?;
        let instructions = if state.turn == 0 {
            "Analyze the user request and generate an execution plan. \
             Request environmental data or user clarification if needed."
        } else {
            "Continue the conversation based on the history and context. \
             Generate commands or request additional information as needed."
        };
        Ok(json!({
            "type": "conversation",
            "conversation_id": state.id,
            "turn": state.turn,
            "user_input": instruction_context,
            "conversation_history": state.history,
            "current_context": state.context,
            "requires_environmental_update": state.requires_env_update,
            "instructions": instructions,
        }))
    }

    fn set_awaiting(&self, conversation_id: &str, awaiting: bool) {
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(state) = conversations.get_mut(conversation_id) {
            state.awaiting_response = awaiting;
        }
    }

    fn touch(&self, conversation_id: &str) {
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(state) = conversations.get_mut(conversation_id) {
            state.last_interaction = Instant::now();
        }
    }

    async fn gather_environment_data(&self, request: &EnvironmentalDataRequest) -> Value {
        let mut data = serde_json::Map::new();
        if request.windows {
            let windows = self.adapter.list_windows().await;
            data.insert(
                "windows".to_string(),
                serde_json::to_value(windows).unwrap_or(Value::Null),
            );
        }
        if request.application_state {
            let active = self.adapter.active_window().await;
            data.insert(
                "application_state".to_string(),
                json!({"active_window": active}),
            );
        }
        if request.system_resources {
            data.insert(
                "system_resources".to_string(),
                json!({"timestamp": chrono::Utc::now()}),
            );
        }
        if request.screenshot {
            match self.adapter.capture_screen().await {
                Some(shot) => {
                    data.insert(
                        "screenshot".to_string(),
                        json!({
                            "available": true,
                            "width": shot.width,
                            "height": shot.height,
                            "image_base64": BASE64.encode(&shot.data),
                        }),
                    );
                }
                None => {
                    data.insert("screenshot".to_string(), json!({"available": false}));
                }
            }
        }
        Value::Object(data)
    }

    /// Register a pending interaction and surface the prompt to the user.
    /// The returned receiver resolves when `provide_response` is called.
    pub fn request_user_input(
        &self,
        conversation_id: &str,
        spec: UserInteractionSpec,
    ) -> (String, oneshot::Receiver<Value>) {
        let interaction_id = generate_interaction_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut interactions = self.interactions.lock().unwrap();
            interactions.insert(
                interaction_id.clone(),
                PendingInteraction {
                    conversation_id: conversation_id.to_string(),
                    spec: spec.clone(),
                    deadline: Instant::now()
                        + Duration::from_millis(self.config.user_input_timeout_ms),
                    responder: Some(tx),
                },
            );
        }
        if let Some(ui) = &self.ui {
            ui.display_feedback(&format_prompt(&spec));
        }
        info!(interaction_id = %interaction_id, conversation_id, "requested user input");
        (interaction_id, rx)
    }

    /// Wait for the user's answer, bounded by `timeout_ms`.
    pub async fn wait_for_response(
        &self,
        interaction_id: &str,
        receiver: oneshot::Receiver<Value>,
        timeout_ms: u64,
    ) -> Result<Value> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) | Err(_) => {
                self.interactions.lock().unwrap().remove(interaction_id);
                Err(EngineError::UserInteractionTimeout(
                    interaction_id.to_string(),
                ))
            }
        }
    }

    /// Deliver the user's answer. The value is validated against the
    /// interaction's input type before the waiting turn resumes.
    pub fn provide_response(&self, interaction_id: &str, response: Value) -> bool {
        let mut interactions = self.interactions.lock().unwrap();
        let Some(pending) = interactions.get_mut(interaction_id) else {
            return false;
        };
        let validated = validate_response(&pending.spec, response);
        let Some(responder) = pending.responder.take() else {
            return false;
        };
        interactions.remove(interaction_id);
        responder.send(validated).is_ok()
    }

    pub fn pending_interactions(&self) -> Vec<(String, UserInteractionSpec)> {
        self.interactions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, pending)| (id.clone(), pending.spec.clone()))
            .collect()
    }

    pub fn cancel_interaction(&self, interaction_id: &str) {
        self.interactions.lock().unwrap().remove(interaction_id);
    }

    pub fn end(&self, conversation_id: &str) {
        if self
            .conversations
            .lock()
            .unwrap()
            .remove(conversation_id)
            .is_some()
        {
            info!(conversation_id, "ended conversation");
        }
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.conversations
            .lock()
            .unwrap()
            .contains_key(conversation_id)
    }

    pub fn active_count(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }

    pub fn context_of(&self, conversation_id: &str) -> Option<serde_json::Map<String, Value>> {
        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .map(|state| state.context.clone())
    }

    pub fn history_of(&self, conversation_id: &str) -> Vec<Value> {
        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }

    /// Drop conversations inactive for longer than the configured expiration
    /// and interactions past their deadline.
    pub fn cleanup_expired(&self) {
        let expiration = Duration::from_millis(self.config.expiration_ms);
        let now = Instant::now();
        {
            let mut conversations = self.conversations.lock().unwrap();
            conversations.retain(|id, state| {
                let keep = now.duration_since(state.last_interaction) <= expiration;
                if !keep {
                    info!(conversation_id = %id, "cleaning up expired conversation");
                }
                keep
            });
        }
        {
            let mut interactions = self.interactions.lock().unwrap();
            interactions.retain(|id, pending| {
                let keep = now <= pending.deadline;
                if !keep {
                    warn!(interaction_id = %id, "cleaning up expired user interaction");
                }
                keep
            });
        }
    }
}

fn conversation_not_found(conversation_id: &str) -> EngineError {
    EngineError::Internal(format!("conversation not found: {conversation_id}"))
}

fn history_message(role: &str, content: Value) -> Value {
    json!({
        "role": role,
        "content": content,
        "timestamp": chrono::Utc::now(),
    })
}

fn push_history(state: &mut ConversationState, message: Value, cap: usize) {
    state.history.push(message);
    while state.history.len() > cap {
        state.history.remove(0);
    }
}

fn generate_interaction_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..12)
        .map(|_| {
            let digit = rng.random_range(0..16u32);
            char::from_digit(digit, 16).unwrap_or('0')
        })
        .collect();
    format!("INT-{}", suffix.to_uppercase())
}

fn format_prompt(spec: &UserInteractionSpec) -> String {
    let mut prompt = spec.prompt.clone();
    if spec.input_type == InputKind::Choice
        && let Some(choices) = spec.options.get("choices").and_then(Value::as_array)
    {
        prompt.push_str("\nOptions:");
        for (index, choice) in choices.iter().enumerate() {
            let label = choice.as_str().unwrap_or_default();
            prompt.push_str(&format!("\n  {}. {label}", index + 1));
        }
    }
    prompt
}

/// Coerce an answer into the shape the interaction asked for: out-of-range
/// choices fall back to the first option, non-boolean confirmations to
/// `false`.
fn validate_response(spec: &UserInteractionSpec, response: Value) -> Value {
    match spec.input_type {
        InputKind::Choice => {
            let count = spec
                .options
                .get("choices")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            match response.as_i64() {
                Some(choice) if count > 0 && (choice < 1 || choice > count as i64) => json!(1),
                _ => response,
            }
        }
        InputKind::Confirmation => {
            if response.is_boolean() {
                response
            } else {
                json!(false)
            }
        }
        _ => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(input_type: InputKind, options: Value) -> UserInteractionSpec {
        UserInteractionSpec {
            prompt: "pick".to_string(),
            input_type,
            options,
            urgent: false,
        }
    }

    #[test]
    fn out_of_range_choice_defaults_to_first() {
        let spec = spec(InputKind::Choice, json!({"choices": ["a", "b"]}));
        assert_eq!(validate_response(&spec, json!(5)), json!(1));
        assert_eq!(validate_response(&spec, json!(0)), json!(1));
        assert_eq!(validate_response(&spec, json!(2)), json!(2));
    }

    #[test]
    fn non_boolean_confirmation_becomes_false() {
        let spec = spec(InputKind::Confirmation, Value::Null);
        assert_eq!(validate_response(&spec, json!("yes")), json!(false));
        assert_eq!(validate_response(&spec, json!(true)), json!(true));
    }

    #[test]
    fn text_responses_pass_through() {
        let spec = spec(InputKind::Text, Value::Null);
        assert_eq!(
            validate_response(&spec, json!("whatever")),
            json!("whatever")
        );
    }

    #[test]
    fn choice_prompt_lists_numbered_options() {
        let spec = spec(InputKind::Choice, json!({"choices": ["left", "right"]}));
        let prompt = format_prompt(&spec);
        assert!(prompt.contains("1. left"));
        assert!(prompt.contains("2. right"));
    }

    #[test]
    fn interaction_ids_are_unique() {
        let a = generate_interaction_id();
        let b = generate_interaction_id();
        assert!(a.starts_with("INT-"));
        assert_eq!(a.len(), "INT-".len() + 12);
        assert_ne!(a, b);
    }
}
