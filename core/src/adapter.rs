//! Seam to the OS-control layer. The engine only ever talks to a
//! [`OsAdapter`] trait object; the real mouse/keyboard/window implementation
//! lives outside this crate.

use async_trait::async_trait;
use serde_json::Value;

use deskpilot_protocol::EnvironmentSnapshot;
use deskpilot_protocol::WindowInfo;
use deskpilot_protocol::environment::SystemInfo;

/// Result of a single adapter operation.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub success: bool,
    pub output: String,
    pub data: Value,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn ok_with(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Narrow OS-control interface. Each operation reports success or failure in
/// its [`ActionOutcome`]; adapters are expected to honor their own internal
/// timeouts.
#[async_trait]
pub trait OsAdapter: Send + Sync {
    async fn mouse_click(&self, x: i64, y: i64, button: &str) -> ActionOutcome;
    async fn mouse_move(&self, x: i64, y: i64) -> ActionOutcome;
    async fn mouse_drag(&self, from_x: i64, from_y: i64, to_x: i64, to_y: i64) -> ActionOutcome;

    async fn key_type(&self, text: &str) -> ActionOutcome;
    async fn key_press(&self, key: &str) -> ActionOutcome;
    async fn hotkey(&self, keys: &[String]) -> ActionOutcome;

    async fn list_windows(&self) -> Vec<WindowInfo>;
    async fn active_window(&self) -> Option<WindowInfo>;
    async fn focus_window(&self, title: &str) -> ActionOutcome;
    async fn close_window(&self, title: &str) -> ActionOutcome;
    async fn window_bounds(&self, title: &str) -> ActionOutcome;

    async fn launch_application(&self, path: &str, args: &[String]) -> ActionOutcome;
    async fn terminate_application(&self, name: &str) -> ActionOutcome;
    async fn wait_for_process(&self, name: &str, timeout_ms: u64) -> ActionOutcome;

    async fn clipboard_get(&self) -> ActionOutcome;
    async fn clipboard_set(&self, text: &str) -> ActionOutcome;
    async fn run_system_command(&self, command: &str) -> ActionOutcome;
    async fn capture_screen(&self) -> Option<Screenshot>;
}

/// Capture a full environment snapshot through the adapter.
pub async fn capture_snapshot(adapter: &dyn OsAdapter) -> EnvironmentSnapshot {
    EnvironmentSnapshot {
        windows: adapter.list_windows().await,
        active_window: adapter.active_window().await,
        system: SystemInfo::default(),
    }
}

/// Stand-in adapter for deployments where no OS layer is wired yet: every
/// action succeeds without touching the desktop, and the window list is
/// empty.
#[derive(Debug, Default)]
pub struct NoopAdapter;

#[async_trait]
impl OsAdapter for NoopAdapter {
    async fn mouse_click(&self, x: i64, y: i64, button: &str) -> ActionOutcome {
        ActionOutcome::ok_with(format!("mouse.click {button} at ({x}, {y})"))
    }

    async fn mouse_move(&self, x: i64, y: i64) -> ActionOutcome {
        ActionOutcome::ok_with(format!("mouse.move to ({x}, {y})"))
    }

    async fn mouse_drag(&self, from_x: i64, from_y: i64, to_x: i64, to_y: i64) -> ActionOutcome {
        ActionOutcome::ok_with(format!(
            "mouse.drag ({from_x}, {from_y}) -> ({to_x}, {to_y})"
        ))
    }

    async fn key_type(&self, text: &str) -> ActionOutcome {
        ActionOutcome::ok_with(format!("keyboard.type {} chars", text.chars().count()))
    }

    async fn key_press(&self, key: &str) -> ActionOutcome {
        ActionOutcome::ok_with(format!("keyboard.press {key}"))
    }

    async fn hotkey(&self, keys: &[String]) -> ActionOutcome {
        ActionOutcome::ok_with(format!("keyboard.hotkey {}", keys.join("+")))
    }

    async fn list_windows(&self) -> Vec<WindowInfo> {
        Vec::new()
    }

    async fn active_window(&self) -> Option<WindowInfo> {
        None
    }

    async fn focus_window(&self, title: &str) -> ActionOutcome {
        ActionOutcome::ok_with(format!("window.focus {title}"))
    }

    async fn close_window(&self, title: &str) -> ActionOutcome {
        ActionOutcome::ok_with(format!("window.close {title}"))
    }

    async fn window_bounds(&self, title: &str) -> ActionOutcome {
        ActionOutcome::failed(format!("no such window: {title}"))
    }

    async fn launch_application(&self, path: &str, _args: &[String]) -> ActionOutcome {
        ActionOutcome::ok_with(format!("application.launch {path}"))
    }

    async fn terminate_application(&self, name: &str) -> ActionOutcome {
        ActionOutcome::ok_with(format!("application.close {name}"))
    }

    async fn wait_for_process(&self, name: &str, _timeout_ms: u64) -> ActionOutcome {
        ActionOutcome::ok_with(format!("process.wait {name}"))
    }

    async fn clipboard_get(&self) -> ActionOutcome {
        ActionOutcome::ok_with("")
    }

    async fn clipboard_set(&self, _text: &str) -> ActionOutcome {
        ActionOutcome::ok()
    }

    async fn run_system_command(&self, command: &str) -> ActionOutcome {
        ActionOutcome::ok_with(format!("system.run {command}"))
    }

    async fn capture_screen(&self) -> Option<Screenshot> {
        None
    }
}
