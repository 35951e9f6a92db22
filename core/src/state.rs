//! Per-request state: execution contexts, completed results, the activity
//! ring and the thread-safe variable store.
//!
//! Locking discipline: one reader-writer lock over the context map, one over
//! the result map, never both at once. Closures passed to `with_context*`
//! must not touch any other store lock and must not block on external I/O.

// Poisoned locks should fail the program.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::info;

use crate::error::EngineError;
use crate::error::Result;
use deskpilot_protocol::EnvironmentSnapshot;
use deskpilot_protocol::ExecutionStatus;
use deskpilot_protocol::TaskExecutionResult;

/// Mapping from variable name to semantic JSON value, shared-read and
/// exclusive-write, with a version counter bumped on every write so callers
/// can sample before and after an operation for optimistic consistency
/// checks.
#[derive(Debug, Default)]
pub struct VariableStore {
    entries: RwLock<HashMap<String, Value>>,
    version: AtomicU64,
}

impl VariableStore {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.read().unwrap().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.read().unwrap().contains_key(name)
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.entries.write().unwrap().insert(name.into(), value);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        let removed = self.entries.write().unwrap().remove(name);
        if removed.is_some() {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.read().unwrap().clone()
    }

    /// Insert every entry that is not already present; existing entries win.
    pub fn merge_missing(&self, incoming: &serde_json::Map<String, Value>) {
        let mut entries = self.entries.write().unwrap();
        let mut changed = false;
        for (name, value) in incoming {
            if !entries.contains_key(name) {
                entries.insert(name.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

/// Per-request mutable state. Owned exclusively by the [`StateStore`];
/// borrowed mutably by at most one worker at a time through `with_context`.
#[derive(Debug)]
pub struct ExecutionContext {
    pub request_id: String,
    pub original_request: String,
    pub variables: VariableStore,
    pub script_stack: Vec<PathBuf>,
    pub max_nesting: usize,
    pub sub_script_results: HashMap<String, Value>,
    pub execution_log: Vec<String>,
    pub current_environment: Option<EnvironmentSnapshot>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    pub fn new(request_id: String, original_request: String, max_nesting: usize) -> Self {
        Self {
            request_id,
            original_request,
            variables: VariableStore::default(),
            script_stack: Vec::new(),
            max_nesting,
            sub_script_results: HashMap::new(),
            execution_log: Vec::new(),
            current_environment: None,
            status: ExecutionStatus::Pending,
            error_message: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Nesting depth is the script stack depth, by definition.
    pub fn nesting(&self) -> usize {
        self.script_stack.len()
    }

    pub fn log(&mut self, entry: impl Into<String>) {
        self.execution_log.push(entry.into());
    }
}

/// Bounded ring of recent activity lines. The write position is a single
/// fetch-add, so pushes never contend on a global lock; each slot has its own
/// short-lived lock for the string swap.
pub struct ActivityLog {
    slots: Box<[Mutex<String>]>,
    write_pos: AtomicUsize,
    len: AtomicUsize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| Mutex::new(String::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            write_pos: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, entry: String) {
        let pos = self.write_pos.fetch_add(1, Ordering::SeqCst) % self.slots.len();
        *self.slots[pos].lock().unwrap() = entry;

        let mut current = self.len.load(Ordering::SeqCst);
        while current < self.slots.len() {
            match self.len.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn recent(&self) -> Vec<String> {
        let len = self.len.load(Ordering::SeqCst).min(self.slots.len());
        let start = self
            .write_pos
            .load(Ordering::SeqCst)
            .wrapping_sub(len)
            % self.slots.len();

        let mut entries = Vec::with_capacity(len);
        for i in 0..len {
            let slot = self.slots[(start + i) % self.slots.len()].lock().unwrap();
            if !slot.is_empty() {
                entries.push(slot.clone());
            }
        }
        entries
    }
}

#[derive(Debug, Default)]
pub struct StateStats {
    pub total_requests: AtomicU64,
    pub active_requests: AtomicU64,
    pub completed_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub variable_accesses: AtomicU64,
    pub context_borrows: AtomicU64,
}

impl StateStats {
    fn to_json(&self) -> Value {
        json!({
            "total_requests": self.total_requests.load(Ordering::SeqCst),
            "active_requests": self.active_requests.load(Ordering::SeqCst),
            "completed_requests": self.completed_requests.load(Ordering::SeqCst),
            "failed_requests": self.failed_requests.load(Ordering::SeqCst),
            "variable_accesses": self.variable_accesses.load(Ordering::SeqCst),
            "context_borrows": self.context_borrows.load(Ordering::SeqCst),
        })
    }

    fn load_json(&self, stats: &Value) {
        let field = |name: &str| stats.get(name).and_then(Value::as_u64).unwrap_or(0);
        self.total_requests
            .store(field("total_requests"), Ordering::SeqCst);
        self.active_requests
            .store(field("active_requests"), Ordering::SeqCst);
        self.completed_requests
            .store(field("completed_requests"), Ordering::SeqCst);
        self.failed_requests
            .store(field("failed_requests"), Ordering::SeqCst);
        self.variable_accesses
            .store(field("variable_accesses"), Ordering::SeqCst);
        self.context_borrows
            .store(field("context_borrows"), Ordering::SeqCst);
    }
}

/// Owns per-request execution contexts and completed results.
pub struct StateStore {
    contexts: RwLock<HashMap<String, ExecutionContext>>,
    results: RwLock<HashMap<String, CompletedEntry>>,
    activity: ActivityLog,
    stats: StateStats,
    request_counter: AtomicU64,
    max_completed: usize,
    max_nesting: usize,
}

struct CompletedEntry {
    result: TaskExecutionResult,
    completed_at: DateTime<Utc>,
}

impl StateStore {
    pub fn new(max_completed: usize, activity_log_size: usize, max_nesting: usize) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            activity: ActivityLog::new(activity_log_size),
            stats: StateStats::default(),
            request_counter: AtomicU64::new(0),
            max_completed: max_completed.max(1),
            max_nesting,
        }
    }

    /// Allocate a request id, create its context, log the creation. Emits no
    /// events.
    pub fn create_request(&self, user_input: &str) -> String {
        let request_id = self.generate_request_id();
        let context = ExecutionContext::new(
            request_id.clone(),
            user_input.to_string(),
            self.max_nesting,
        );
        self.contexts
            .write()
            .unwrap()
            .insert(request_id.clone(), context);

        self.stats.total_requests.fetch_add(1, Ordering::SeqCst);
        self.log_activity(&format!("request created: {request_id}"));
        info!(request_id = %request_id, "created request");
        request_id
    }

    pub fn has_request(&self, request_id: &str) -> bool {
        self.contexts.read().unwrap().contains_key(request_id)
    }

    pub fn remove_request(&self, request_id: &str) {
        self.contexts.write().unwrap().remove(request_id);
        self.log_activity(&format!("request removed: {request_id}"));
    }

    /// Run `f` with an exclusive borrow of the context. `f` must not acquire
    /// any other store lock and must not block on external I/O.
    pub fn with_context<R>(
        &self,
        request_id: &str,
        f: impl FnOnce(&mut ExecutionContext) -> R,
    ) -> Result<R> {
        let mut contexts = self.contexts.write().unwrap();
        let context = contexts
            .get_mut(request_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown request id: {request_id}")))?;
        self.stats.context_borrows.fetch_add(1, Ordering::SeqCst);
        Ok(f(context))
    }

    /// Take exclusive ownership of the context for the duration of an
    /// execution. The context leaves the map so no other worker can borrow
    /// it; it must be returned with [`StateStore::checkin`] on every path.
    pub fn checkout(&self, request_id: &str) -> Result<ExecutionContext> {
        let mut contexts = self.contexts.write().unwrap();
        self.stats.context_borrows.fetch_add(1, Ordering::SeqCst);
        contexts
            .remove(request_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown request id: {request_id}")))
    }

    pub fn checkin(&self, context: ExecutionContext) {
        self.contexts
            .write()
            .unwrap()
            .insert(context.request_id.clone(), context);
    }

    /// Shared-lock counterpart of [`StateStore::with_context`].
    pub fn with_context_read<R>(
        &self,
        request_id: &str,
        f: impl FnOnce(&ExecutionContext) -> R,
    ) -> Result<R> {
        let contexts = self.contexts.read().unwrap();
        let context = contexts
            .get(request_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown request id: {request_id}")))?;
        Ok(f(context))
    }

    pub fn mark_active(&self, request_id: &str) -> Result<()> {
        self.with_context(request_id, |context| {
            context.status = ExecutionStatus::InProgress;
            context.start_time = Utc::now();
        })?;
        self.stats.active_requests.fetch_add(1, Ordering::SeqCst);
        self.log_activity(&format!("execution started: {request_id}"));
        Ok(())
    }

    /// Publish the result, seal the context, and evict the oldest completed
    /// entry when over the retention cap.
    pub fn mark_complete(&self, request_id: &str, result: TaskExecutionResult) -> Result<()> {
        let now = Utc::now();
        let was_active = self.with_context(request_id, |context| {
            let was_active = context.status == ExecutionStatus::InProgress;
            context.status = result.status;
            context.error_message = result.error_message.clone();
            context.end_time = Some(now);
            was_active
        })?;

        {
            let mut results = self.results.write().unwrap();
            results.insert(
                request_id.to_string(),
                CompletedEntry {
                    result: result.clone(),
                    completed_at: now,
                },
            );
            while results.len() > self.max_completed {
                let oldest = results
                    .iter()
                    .min_by_key(|(_, entry)| entry.completed_at)
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => {
                        debug!(request_id = %id, "evicting oldest completed execution");
                        results.remove(&id);
                    }
                    None => break,
                }
            }
        }

        if was_active {
            self.stats.active_requests.fetch_sub(1, Ordering::SeqCst);
        }
        self.stats.completed_requests.fetch_add(1, Ordering::SeqCst);
        if result.status == ExecutionStatus::Failed {
            self.stats.failed_requests.fetch_add(1, Ordering::SeqCst);
        }
        self.log_activity(&format!(
            "execution completed: {request_id} status: {:?}",
            result.status
        ));
        Ok(())
    }

    pub fn is_active(&self, request_id: &str) -> bool {
        self.with_context_read(request_id, |context| {
            context.status == ExecutionStatus::InProgress
        })
        .unwrap_or(false)
    }

    pub fn active_requests(&self) -> Vec<String> {
        self.contexts
            .read()
            .unwrap()
            .iter()
            .filter(|(_, context)| context.status == ExecutionStatus::InProgress)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.stats.active_requests.load(Ordering::SeqCst) as usize
    }

    pub fn result(&self, request_id: &str) -> Option<TaskExecutionResult> {
        self.results
            .read()
            .unwrap()
            .get(request_id)
            .map(|entry| entry.result.clone())
    }

    pub fn has_result(&self, request_id: &str) -> bool {
        self.results.read().unwrap().contains_key(request_id)
    }

    pub fn completed_count(&self) -> usize {
        self.results.read().unwrap().len()
    }

    pub fn set_variable(&self, request_id: &str, name: &str, value: Value) -> Result<()> {
        self.stats.variable_accesses.fetch_add(1, Ordering::SeqCst);
        self.with_context(request_id, |context| context.variables.set(name, value))
    }

    pub fn get_variable(&self, request_id: &str, name: &str) -> Option<Value> {
        self.stats.variable_accesses.fetch_add(1, Ordering::SeqCst);
        self.with_context_read(request_id, |context| context.variables.get(name))
            .ok()
            .flatten()
    }

    pub fn has_variable(&self, request_id: &str, name: &str) -> bool {
        self.with_context_read(request_id, |context| context.variables.has(name))
            .unwrap_or(false)
    }

    /// Shallow-copy all variables and sub-script results from one context to
    /// another. The two borrows are sequential, never simultaneous.
    pub fn inherit(&self, from_request_id: &str, to_request_id: &str) -> Result<()> {
        let (variables, sub_results) = self.with_context_read(from_request_id, |context| {
            (
                context.variables.snapshot(),
                context.sub_script_results.clone(),
            )
        })?;
        self.with_context(to_request_id, |context| {
            for (name, value) in variables {
                context.variables.set(name, value);
            }
            for (name, value) in sub_results {
                context.sub_script_results.insert(name, value);
            }
        })
    }

    pub fn push_script(&self, request_id: &str, script_path: &Path) -> Result<()> {
        self.with_context(request_id, |context| {
            context.script_stack.push(script_path.to_path_buf());
        })?;
        self.log_activity(&format!(
            "script push: {request_id} {}",
            script_path.display()
        ));
        Ok(())
    }

    pub fn pop_script(&self, request_id: &str) -> Result<()> {
        self.with_context(request_id, |context| {
            context.script_stack.pop();
        })?;
        self.log_activity(&format!("script pop: {request_id}"));
        Ok(())
    }

    pub fn is_script_in_stack(&self, request_id: &str, script_path: &Path) -> bool {
        self.with_context_read(request_id, |context| {
            context.script_stack.iter().any(|p| p == script_path)
        })
        .unwrap_or(false)
    }

    pub fn script_depth(&self, request_id: &str) -> usize {
        self.with_context_read(request_id, |context| context.script_stack.len())
            .unwrap_or(0)
    }

    pub fn log_activity(&self, activity: &str) {
        let line = format!("{} {activity}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        self.activity.push(line);
    }

    pub fn recent_activity(&self) -> Vec<String> {
        self.activity.recent()
    }

    /// JSON round-trip of all contexts, results and statistics, used for
    /// diagnostics and restart.
    pub fn export_state(&self) -> Value {
        let contexts: Vec<Value> = {
            let contexts = self.contexts.read().unwrap();
            contexts
                .values()
                .map(|context| {
                    json!({
                        "request_id": context.request_id,
                        "original_request": context.original_request,
                        "status": context.status,
                        "error_message": context.error_message,
                        "script_stack": context.script_stack,
                        "variables": context.variables.snapshot(),
                        "sub_script_results": context.sub_script_results,
                        "execution_log": context.execution_log,
                        "start_time": context.start_time,
                        "end_time": context.end_time,
                    })
                })
                .collect()
        };

        let results: Vec<Value> = {
            let results = self.results.read().unwrap();
            results
                .iter()
                .map(|(id, entry)| {
                    json!({
                        "request_id": id,
                        "result": entry.result,
                        "completed_at": entry.completed_at,
                    })
                })
                .collect()
        };

        json!({
            "contexts": contexts,
            "results": results,
            "statistics": self.stats.to_json(),
            "activity": self.recent_activity(),
        })
    }

    pub fn import_state(&self, state: &Value) -> Result<()> {
        let contexts_json = state
            .get("contexts")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::InvalidInput("state missing `contexts`".to_string()))?;

        let mut imported = HashMap::new();
        for entry in contexts_json {
            let request_id = entry
                .get("request_id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    EngineError::InvalidInput("context missing `request_id`".to_string())
                })?
                .to_string();
            let mut context = ExecutionContext::new(
                request_id.clone(),
                entry
                    .get("original_request")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                self.max_nesting,
            );
            if let Some(status) = entry.get("status") {
                context.status = serde_json::from_value(status.clone())?;
            }
            context.error_message = entry
                .get("error_message")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(stack) = entry.get("script_stack") {
                context.script_stack = serde_json::from_value(stack.clone())?;
            }
            if let Some(Value::Object(variables)) = entry.get("variables") {
                for (name, value) in variables {
                    context.variables.set(name.clone(), value.clone());
                }
            }
            if let Some(Value::Object(sub_results)) = entry.get("sub_script_results") {
                context.sub_script_results = sub_results
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
            }
            if let Some(log) = entry.get("execution_log") {
                context.execution_log = serde_json::from_value(log.clone())?;
            }
            if let Some(start) = entry.get("start_time") {
                context.start_time = serde_json::from_value(start.clone())?;
            }
            if let Some(end) = entry.get("end_time") {
                context.end_time = serde_json::from_value(end.clone())?;
            }
            imported.insert(request_id, context);
        }

        let mut imported_results = HashMap::new();
        if let Some(results_json) = state.get("results").and_then(Value::as_array) {
            for entry in results_json {
                let request_id = entry
                    .get("request_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        EngineError::InvalidInput("result missing `request_id`".to_string())
                    })?
                    .to_string();
                let result: TaskExecutionResult =
                    serde_json::from_value(entry.get("result").cloned().unwrap_or_default())?;
                let completed_at = entry
                    .get("completed_at")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()?
                    .unwrap_or_else(Utc::now);
                imported_results.insert(
                    request_id,
                    CompletedEntry {
                        result,
                        completed_at,
                    },
                );
            }
        }

        *self.contexts.write().unwrap() = imported;
        *self.results.write().unwrap() = imported_results;
        if let Some(stats) = state.get("statistics") {
            self.stats.load_json(stats);
        }
        info!("state imported");
        Ok(())
    }

    fn generate_request_id(&self) -> String {
        let counter = self.request_counter.fetch_add(1, Ordering::SeqCst);
        format!("REQ-{:X}-{counter}", Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> StateStore {
        StateStore::new(100, 16, 3)
    }

    #[test]
    fn request_ids_are_unique_and_prefixed() {
        let store = store();
        let a = store.create_request("one");
        let b = store.create_request("two");
        assert_ne!(a, b);
        assert!(a.starts_with("REQ-"));
    }

    #[test]
    fn variable_store_bumps_version_on_write() {
        let vars = VariableStore::default();
        assert_eq!(vars.version(), 0);
        vars.set("name", json!("Alice"));
        assert_eq!(vars.version(), 1);
        assert_eq!(vars.get("name"), Some(json!("Alice")));
        assert!(vars.has("name"));
        vars.remove("name");
        assert_eq!(vars.version(), 2);
        assert!(!vars.has("name"));
    }

    #[test]
    fn merge_missing_keeps_existing_entries() {
        let vars = VariableStore::default();
        vars.set("a", json!(1));
        let mut incoming = serde_json::Map::new();
        incoming.insert("a".to_string(), json!(99));
        incoming.insert("b".to_string(), json!(2));
        vars.merge_missing(&incoming);
        assert_eq!(vars.get("a"), Some(json!(1)));
        assert_eq!(vars.get("b"), Some(json!(2)));
    }

    #[test]
    fn active_xor_result_after_complete() {
        let store = store();
        let id = store.create_request("input");
        store.mark_active(&id).expect("mark active");
        assert!(store.is_active(&id));
        assert!(!store.has_result(&id));

        store
            .mark_complete(&id, TaskExecutionResult::succeeded(&id, "ok"))
            .expect("mark complete");
        assert!(!store.is_active(&id));
        assert!(store.has_result(&id));
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn completed_results_are_capped_by_evicting_oldest() {
        let store = StateStore::new(2, 16, 3);
        let ids: Vec<String> = (0..3).map(|i| store.create_request(&format!("{i}"))).collect();
        for id in &ids {
            store.mark_active(id).expect("active");
            store
                .mark_complete(id, TaskExecutionResult::succeeded(id, ""))
                .expect("complete");
        }
        assert_eq!(store.completed_count(), 2);
        assert!(!store.has_result(&ids[0]));
        assert!(store.has_result(&ids[1]));
        assert!(store.has_result(&ids[2]));
    }

    #[test]
    fn inherit_copies_variables_shallowly() {
        let store = store();
        let from = store.create_request("parent");
        let to = store.create_request("child");
        store.set_variable(&from, "name", json!("Alice")).expect("set");
        store
            .with_context(&from, |context| {
                context
                    .sub_script_results
                    .insert("child_result".to_string(), json!("ok"));
            })
            .expect("sub result");

        store.inherit(&from, &to).expect("inherit");
        assert_eq!(store.get_variable(&to, "name"), Some(json!("Alice")));
        let copied = store
            .with_context_read(&to, |context| context.sub_script_results.clone())
            .expect("read");
        assert_eq!(copied.get("child_result"), Some(&json!("ok")));
    }

    #[test]
    fn script_stack_tracks_depth_and_membership() {
        let store = store();
        let id = store.create_request("scripts");
        let path = Path::new("scripts/a.json");
        store.push_script(&id, path).expect("push");
        assert!(store.is_script_in_stack(&id, path));
        assert_eq!(store.script_depth(&id), 1);
        store.pop_script(&id).expect("pop");
        assert_eq!(store.script_depth(&id), 0);
        assert!(!store.is_script_in_stack(&id, path));
    }

    #[test]
    fn activity_ring_keeps_only_recent_entries() {
        let log = ActivityLog::new(4);
        for i in 0..10 {
            log.push(format!("entry {i}"));
        }
        let recent = log.recent();
        assert_eq!(recent, vec!["entry 6", "entry 7", "entry 8", "entry 9"]);
    }

    #[test]
    fn export_import_round_trips_visible_state() {
        let store = store();
        let id = store.create_request("round trip");
        store.set_variable(&id, "x", json!(42)).expect("set");
        store.mark_active(&id).expect("active");
        store
            .mark_complete(&id, TaskExecutionResult::succeeded(&id, "done"))
            .expect("complete");

        let exported = store.export_state();

        let fresh = StateStore::new(100, 16, 3);
        fresh.import_state(&exported).expect("import");
        assert!(fresh.has_request(&id));
        assert!(fresh.has_result(&id));
        assert_eq!(fresh.get_variable(&id, "x"), Some(json!(42)));
        assert_eq!(
            fresh.result(&id).map(|r| r.output),
            Some("done".to_string())
        );
    }

    #[test]
    fn unknown_request_is_an_error_for_context_access() {
        let store = store();
        assert!(store.with_context("REQ-NOPE", |_| ()).is_err());
        assert!(!store.is_active("REQ-NOPE"));
        assert_eq!(store.result("REQ-NOPE"), None);
    }
}
