//! Loading, validation and caching of on-disk scripts.
//!
//! Scripts live under a single trusted root. Any path containing a `..`
//! segment, and any absolute path that does not resolve under the root, is
//! rejected before touching the filesystem. Resolved paths are the canonical
//! cache key and the unit of cycle detection.

// Poisoned locks should fail the program.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::error::Result;
use deskpilot_protocol::Plan;
use deskpilot_protocol::plan::ScriptMetadata;

pub struct ScriptManager {
    scripts_root: PathBuf,
    max_nesting: usize,
    cache_enabled: bool,
    cache: Mutex<HashMap<PathBuf, Arc<Plan>>>,
}

impl ScriptManager {
    pub fn new(scripts_root: PathBuf, max_nesting: usize, cache_enabled: bool) -> Self {
        Self {
            scripts_root: normalize(&scripts_root),
            max_nesting,
            cache_enabled,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_nesting(&self) -> usize {
        self.max_nesting
    }

    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }

    /// Resolve a user-supplied script path to its canonical on-disk location.
    ///
    /// Relative paths resolve under the scripts root; absolute paths must
    /// already point under it. `.json` is appended when no extension is
    /// present.
    pub fn resolve(&self, script_path: &str) -> Result<PathBuf> {
        let requested = Path::new(script_path);
        if requested
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(EngineError::ScriptPathUnsafe(requested.to_path_buf()));
        }

        let mut resolved = if requested.is_absolute() {
            normalize(requested)
        } else {
            normalize(&self.scripts_root.join(requested))
        };
        if resolved.extension().is_none() {
            resolved.set_extension("json");
        }
        if !resolved.starts_with(&self.scripts_root) {
            return Err(EngineError::ScriptPathUnsafe(requested.to_path_buf()));
        }
        Ok(resolved)
    }

    /// Load, validate and cache the script at a pre-resolved path.
    pub fn load(&self, resolved: &Path) -> Result<Arc<Plan>> {
        if self.cache_enabled
            && let Some(script) = self.cache.lock().unwrap().get(resolved)
        {
            debug!(script_path = %resolved.display(), "script cache hit");
            return Ok(Arc::clone(script));
        }

        let contents = std::fs::read_to_string(resolved).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::ScriptNotFound(resolved.to_path_buf())
            } else {
                EngineError::Io(e)
            }
        })?;
        let raw: Value = serde_json::from_str(&contents)?;
        validate_script(&raw)?;
        let script: Arc<Plan> = Arc::new(serde_json::from_value(raw)?);

        if self.cache_enabled {
            self.cache
                .lock()
                .unwrap()
                .insert(resolved.to_path_buf(), Arc::clone(&script));
        }
        Ok(script)
    }

    /// Resolve and load in one step.
    pub fn load_by_name(&self, script_path: &str) -> Result<Arc<Plan>> {
        let resolved = self.resolve(script_path)?;
        self.load(&resolved)
    }

    /// Statically walk `EXECUTE_SCRIPT` references from `script_path` and
    /// fail on the first cycle, without executing anything.
    pub fn check_static_cycles(&self, script_path: &str) -> Result<()> {
        let resolved = self.resolve(script_path)?;
        let mut visiting = Vec::new();
        self.walk_for_cycles(&resolved, &mut visiting)
    }

    fn walk_for_cycles(&self, resolved: &Path, visiting: &mut Vec<PathBuf>) -> Result<()> {
        if visiting.iter().any(|p| p == resolved) {
            return Err(EngineError::CircularScriptDependency(
                resolved.to_path_buf(),
            ));
        }
        let script = self.load(resolved)?;
        visiting.push(resolved.to_path_buf());
        for command in &script.commands {
            if command.command == "EXECUTE_SCRIPT"
                && let Some(child) = command.param_str("script_path")
            {
                let child_resolved = self.resolve(child)?;
                self.walk_for_cycles(&child_resolved, visiting)?;
            }
        }
        visiting.pop();
        Ok(())
    }

    /// All `.json` files under the scripts root, recursively.
    pub fn list_scripts(&self) -> Vec<PathBuf> {
        let mut scripts = Vec::new();
        let mut pending = vec![self.scripts_root.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    scripts.push(path);
                }
            }
        }
        scripts.sort();
        scripts
    }

    pub fn script_exists(&self, script_path: &str) -> bool {
        self.resolve(script_path)
            .map(|resolved| resolved.is_file())
            .unwrap_or(false)
    }

    pub fn metadata(&self, script_path: &str) -> Result<ScriptMetadata> {
        let script = self.load_by_name(script_path)?;
        Ok(script.metadata.clone().unwrap_or_default())
    }

    pub fn preload(&self, script_path: &str) -> Result<()> {
        self.load_by_name(script_path).map(|_| ())
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
        debug!("script cache cleared");
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

/// Structural validation: an object with a non-empty `commands` or `sequence`
/// array of objects carrying string `command` fields; `variables`, when
/// present, must be an object.
fn validate_script(raw: &Value) -> Result<()> {
    let Value::Object(object) = raw else {
        return Err(EngineError::InvalidPlan("script is not an object".into()));
    };

    let commands = object
        .get("commands")
        .or_else(|| object.get("sequence"))
        .ok_or_else(|| EngineError::InvalidPlan("missing `commands` or `sequence` array".into()))?;
    let Value::Array(commands) = commands else {
        return Err(EngineError::InvalidPlan(
            "`commands` must be an array".into(),
        ));
    };
    if commands.is_empty() {
        return Err(EngineError::InvalidPlan("empty command array".into()));
    }
    for (index, command) in commands.iter().enumerate() {
        let Value::Object(command) = command else {
            return Err(EngineError::InvalidPlan(format!(
                "command {index} is not an object"
            )));
        };
        if !command.get("command").is_some_and(Value::is_string) {
            return Err(EngineError::InvalidPlan(format!(
                "command {index} missing string `command` field"
            )));
        }
    }

    if let Some(variables) = object.get("variables")
        && !variables.is_object()
    {
        return Err(EngineError::InvalidPlan(
            "`variables` must be an object".into(),
        ));
    }
    Ok(())
}

/// Validate a plan submitted directly (not from disk) against the same rules.
pub fn validate_plan_value(raw: &Value) -> Result<()> {
    validate_script(raw)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn manager_in(dir: &Path) -> ScriptManager {
        ScriptManager::new(dir.to_path_buf(), 3, true)
    }

    fn write_script(dir: &Path, name: &str, body: &Value) {
        std::fs::write(dir.join(name), serde_json::to_string_pretty(body).unwrap()).unwrap();
    }

    #[test]
    fn rejects_parent_dir_segments() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let err = manager.resolve("../outside").unwrap_err();
        assert!(matches!(err, EngineError::ScriptPathUnsafe(_)));
    }

    #[test]
    fn rejects_absolute_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let err = manager.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, EngineError::ScriptPathUnsafe(_)));
    }

    #[test]
    fn accepts_absolute_paths_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let inside = dir.path().join("child.json");
        let resolved = manager.resolve(inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, normalize(&inside));
    }

    #[test]
    fn appends_json_extension() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let resolved = manager.resolve("setup").unwrap();
        assert_eq!(resolved.extension().and_then(|e| e.to_str()), Some("json"));
    }

    #[test]
    fn missing_script_maps_to_script_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let err = manager.load_by_name("absent").unwrap_err();
        assert!(matches!(err, EngineError::ScriptNotFound(_)));
    }

    #[test]
    fn empty_command_array_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "empty.json", &json!({"commands": []}));
        let manager = manager_in(dir.path());
        let err = manager.load_by_name("empty").unwrap_err();
        assert!(matches!(err, EngineError::InvalidPlan(_)));
    }

    #[test]
    fn command_without_name_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "bad.json",
            &json!({"commands": [{"parameters": {}}]}),
        );
        let manager = manager_in(dir.path());
        let err = manager.load_by_name("bad").unwrap_err();
        assert!(matches!(err, EngineError::InvalidPlan(_)));
    }

    #[test]
    fn sequence_alias_is_accepted_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "seq.json",
            &json!({"sequence": [{"command": "system.sleep", "parameters": {"ms": 1}}]}),
        );
        let manager = manager_in(dir.path());
        let script = manager.load_by_name("seq").unwrap();
        assert_eq!(script.commands.len(), 1);
    }

    #[test]
    fn cache_returns_same_parse_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "cached.json",
            &json!({"commands": [{"command": "system.sleep"}]}),
        );
        let manager = manager_in(dir.path());
        let first = manager.load_by_name("cached").unwrap();
        let second = manager.load_by_name("cached").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.cache_size(), 1);

        manager.clear_cache();
        assert_eq!(manager.cache_size(), 0);
    }

    #[test]
    fn static_cycle_scan_detects_mutual_recursion() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "a.json",
            &json!({"commands": [
                {"command": "EXECUTE_SCRIPT", "parameters": {"script_path": "b.json"}}
            ]}),
        );
        write_script(
            dir.path(),
            "b.json",
            &json!({"commands": [
                {"command": "EXECUTE_SCRIPT", "parameters": {"script_path": "a.json"}}
            ]}),
        );
        let manager = manager_in(dir.path());
        let err = manager.check_static_cycles("a.json").unwrap_err();
        assert!(matches!(err, EngineError::CircularScriptDependency(_)));
    }

    #[test]
    fn lists_scripts_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_script(dir.path(), "top.json", &json!({"commands": [{"command": "x"}]}));
        write_script(
            &dir.path().join("nested"),
            "inner.json",
            &json!({"commands": [{"command": "x"}]}),
        );
        std::fs::write(dir.path().join("notes.txt"), "not a script").unwrap();

        let manager = manager_in(dir.path());
        let scripts = manager.list_scripts();
        assert_eq!(scripts.len(), 2);
        assert!(manager.script_exists("top"));
        assert!(!manager.script_exists("missing"));
    }

    #[test]
    fn metadata_is_surfaced_when_present() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "meta.json",
            &json!({
                "commands": [{"command": "system.sleep"}],
                "metadata": {"description": "settle", "version": "1.2", "requiredParameters": ["target"]}
            }),
        );
        let manager = manager_in(dir.path());
        let metadata = manager.metadata("meta").unwrap();
        assert_eq!(metadata.description, "settle");
        assert_eq!(metadata.version, "1.2");
        assert_eq!(metadata.required_parameters, vec!["target".to_string()]);
    }
}
