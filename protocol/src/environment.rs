//! Point-in-time captures of the desktop environment and the delta model the
//! feedback controller reasons about.
//!
//! Snapshots are immutable once published; deltas and similarity scores are
//! pure functions of two snapshots.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub title: String,
    #[serde(default, alias = "className")]
    pub class_name: String,
    #[serde(default, alias = "processName")]
    pub process_name: String,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub minimized: bool,
    #[serde(default)]
    pub maximized: bool,
    #[serde(default)]
    pub z_order: i32,
}

impl WindowInfo {
    /// Identity used for membership comparison between snapshots.
    fn key(&self) -> (&str, &str) {
        (self.title.as_str(), self.class_name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    #[serde(default)]
    pub windows: Vec<WindowInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_window: Option<WindowInfo>,
    #[serde(default)]
    pub system: SystemInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveWindowChange {
    pub from: Option<WindowInfo>,
    pub to: Option<WindowInfo>,
}

/// Membership and focus changes between two consecutive snapshots. Windows
/// are keyed by `(title, class_name)`; a window with the same key but moved
/// or resized bounds counts as changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentDelta {
    pub windows_added: Vec<WindowInfo>,
    pub windows_removed: Vec<WindowInfo>,
    pub windows_changed: Vec<WindowInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_window_changed: Option<ActiveWindowChange>,
}

impl EnvironmentDelta {
    pub fn between(previous: &EnvironmentSnapshot, current: &EnvironmentSnapshot) -> Self {
        let mut delta = Self::default();

        for window in &current.windows {
            match previous.windows.iter().find(|p| p.key() == window.key()) {
                Some(prev) => {
                    if prev.bounds != window.bounds {
                        delta.windows_changed.push(window.clone());
                    }
                }
                None => delta.windows_added.push(window.clone()),
            }
        }

        for prev in &previous.windows {
            if !current.windows.iter().any(|w| w.key() == prev.key()) {
                delta.windows_removed.push(prev.clone());
            }
        }

        let prev_active = previous.active_window.as_ref().map(WindowInfo::key);
        let curr_active = current.active_window.as_ref().map(WindowInfo::key);
        if prev_active != curr_active {
            delta.active_window_changed = Some(ActiveWindowChange {
                from: previous.active_window.clone(),
                to: current.active_window.clone(),
            });
        }

        delta
    }

    pub fn is_empty(&self) -> bool {
        self.windows_added.is_empty()
            && self.windows_removed.is_empty()
            && self.windows_changed.is_empty()
            && self.active_window_changed.is_none()
    }

    /// A change is significant if any window was removed, the active window
    /// changed, or at least three windows appeared at once.
    pub fn is_significant(&self) -> bool {
        !self.windows_removed.is_empty()
            || self.active_window_changed.is_some()
            || self.windows_added.len() >= 3
    }
}

/// Similarity score in `[0, 1]`: each window-count difference costs 10%, an
/// active-window change costs 30%.
pub fn similarity(a: &EnvironmentSnapshot, b: &EnvironmentSnapshot) -> f64 {
    let mut score = 1.0f64;

    let diff = a.windows.len().abs_diff(b.windows.len());
    score -= diff as f64 * 0.1;

    let a_active = a.active_window.as_ref().map(|w| w.title.as_str());
    let b_active = b.active_window.as_ref().map(|w| w.title.as_str());
    if a_active != b_active {
        score -= 0.3;
    }

    score.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn window(title: &str, class: &str) -> WindowInfo {
        WindowInfo {
            title: title.to_string(),
            class_name: class.to_string(),
            visible: true,
            ..Default::default()
        }
    }

    fn snapshot(windows: Vec<WindowInfo>, active: Option<WindowInfo>) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            windows,
            active_window: active,
            system: SystemInfo::default(),
        }
    }

    #[test]
    fn delta_tracks_membership_by_title_and_class() {
        let prev = snapshot(vec![window("a", "A"), window("b", "B")], None);
        let curr = snapshot(vec![window("a", "A"), window("c", "C")], None);

        let delta = EnvironmentDelta::between(&prev, &curr);
        assert_eq!(delta.windows_added.len(), 1);
        assert_eq!(delta.windows_added[0].title, "c");
        assert_eq!(delta.windows_removed.len(), 1);
        assert_eq!(delta.windows_removed[0].title, "b");
        assert!(delta.windows_changed.is_empty());
    }

    #[test]
    fn moved_window_counts_as_changed() {
        let prev = snapshot(vec![window("a", "A")], None);
        let mut moved = window("a", "A");
        moved.bounds.x = 40;
        let curr = snapshot(vec![moved], None);

        let delta = EnvironmentDelta::between(&prev, &curr);
        assert!(delta.windows_added.is_empty());
        assert!(delta.windows_removed.is_empty());
        assert_eq!(delta.windows_changed.len(), 1);
    }

    #[test]
    fn removed_window_is_significant() {
        let prev = snapshot(vec![window("a", "A")], None);
        let curr = snapshot(vec![], None);
        assert!(EnvironmentDelta::between(&prev, &curr).is_significant());
    }

    #[test]
    fn two_added_windows_are_not_significant() {
        let prev = snapshot(vec![], None);
        let curr = snapshot(vec![window("a", "A"), window("b", "B")], None);
        let delta = EnvironmentDelta::between(&prev, &curr);
        assert!(!delta.is_significant());
    }

    #[test]
    fn three_added_windows_are_significant() {
        let prev = snapshot(vec![], None);
        let curr = snapshot(
            vec![window("a", "A"), window("b", "B"), window("c", "C")],
            None,
        );
        assert!(EnvironmentDelta::between(&prev, &curr).is_significant());
    }

    #[test]
    fn similarity_penalizes_counts_and_focus() {
        let base = snapshot(vec![window("a", "A")], Some(window("a", "A")));
        assert_eq!(similarity(&base, &base), 1.0);

        let fewer = snapshot(vec![], Some(window("a", "A")));
        assert!((similarity(&base, &fewer) - 0.9).abs() < 1e-9);

        let refocused = snapshot(vec![window("a", "A")], Some(window("b", "B")));
        assert!((similarity(&base, &refocused) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn similarity_is_clamped_at_zero() {
        let a = snapshot(
            (0..20).map(|i| window(&format!("w{i}"), "W")).collect(),
            None,
        );
        let b = snapshot(vec![], Some(window("x", "X")));
        assert_eq!(similarity(&a, &b), 0.0);
    }
}
