//! Process-wide resource accounting and scoped ownership of OS handles.
//!
//! Every OS resource the engine holds is wrapped in a [`ScopedHandle`] whose
//! release action runs on every exit path. Handles move; they are never
//! copied or implicitly shared.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde_json::Value;
use serde_json::json;
use tracing::info;
use tracing::warn;

use crate::config::ResourceThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    FileHandle,
    ProcessHandle,
    WindowHandle,
    RegistryKey,
    Thread,
    Lock,
    Generic,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::FileHandle,
        ResourceKind::ProcessHandle,
        ResourceKind::WindowHandle,
        ResourceKind::RegistryKey,
        ResourceKind::Thread,
        ResourceKind::Lock,
        ResourceKind::Generic,
    ];

    fn index(self) -> usize {
        match self {
            ResourceKind::FileHandle => 0,
            ResourceKind::ProcessHandle => 1,
            ResourceKind::WindowHandle => 2,
            ResourceKind::RegistryKey => 3,
            ResourceKind::Thread => 4,
            ResourceKind::Lock => 5,
            ResourceKind::Generic => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::FileHandle => "file_handles",
            ResourceKind::ProcessHandle => "process_handles",
            ResourceKind::WindowHandle => "window_handles",
            ResourceKind::RegistryKey => "registry_keys",
            ResourceKind::Thread => "threads",
            ResourceKind::Lock => "locks",
            ResourceKind::Generic => "generic",
        }
    }
}

/// Tracks active counts and peaks per resource family plus a byte count for
/// memory attributed to the engine.
#[derive(Debug, Default)]
pub struct ResourceMonitor {
    active: [AtomicU64; 7],
    peak: [AtomicU64; 7],
    memory_bytes: AtomicU64,
    peak_memory_bytes: AtomicU64,
    enabled: AtomicBool,
}

impl ResourceMonitor {
    pub fn new(enabled: bool) -> Self {
        let monitor = Self::default();
        monitor.enabled.store(enabled, Ordering::SeqCst);
        monitor
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn acquire(&self, kind: ResourceKind) {
        if !self.is_enabled() {
            return;
        }
        let idx = kind.index();
        let now = self.active[idx].fetch_add(1, Ordering::SeqCst) + 1;
        self.peak[idx].fetch_max(now, Ordering::SeqCst);
    }

    pub fn release(&self, kind: ResourceKind) {
        if !self.is_enabled() {
            return;
        }
        let idx = kind.index();
        let previous = self.active[idx].fetch_sub(1, Ordering::SeqCst);
        if previous == 0 {
            // Underflow means a double release; clamp back and complain.
            self.active[idx].store(0, Ordering::SeqCst);
            warn!(kind = kind.name(), "resource released more times than acquired");
        }
    }

    pub fn add_memory(&self, bytes: u64) {
        let now = self.memory_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak_memory_bytes.fetch_max(now, Ordering::SeqCst);
    }

    pub fn remove_memory(&self, bytes: u64) {
        let current = self.memory_bytes.load(Ordering::SeqCst);
        self.memory_bytes
            .store(current.saturating_sub(bytes), Ordering::SeqCst);
    }

    pub fn active(&self, kind: ResourceKind) -> u64 {
        self.active[kind.index()].load(Ordering::SeqCst)
    }

    pub fn peak(&self, kind: ResourceKind) -> u64 {
        self.peak[kind.index()].load(Ordering::SeqCst)
    }

    pub fn memory_usage_mb(&self) -> u64 {
        self.memory_bytes.load(Ordering::SeqCst) / (1024 * 1024)
    }

    pub fn metrics(&self) -> Value {
        let mut active = serde_json::Map::new();
        let mut peak = serde_json::Map::new();
        for kind in ResourceKind::ALL {
            active.insert(kind.name().to_string(), json!(self.active(kind)));
            peak.insert(kind.name().to_string(), json!(self.peak(kind)));
        }
        json!({
            "memory_usage_mb": self.memory_usage_mb(),
            "peak_memory_mb": self.peak_memory_bytes.load(Ordering::SeqCst) / (1024 * 1024),
            "active_resources": active,
            "peak_usage": peak,
        })
    }

    pub fn log_metrics(&self) {
        if self.is_enabled() {
            info!(metrics = %self.metrics(), "resource usage metrics");
        }
    }

    /// Returns the first threshold violation, if any.
    pub fn check_thresholds(&self, thresholds: &ResourceThresholds) -> Option<String> {
        if !thresholds.enabled || !self.is_enabled() {
            return None;
        }
        let checks: [(ResourceKind, u64); 4] = [
            (ResourceKind::FileHandle, thresholds.max_file_handles),
            (ResourceKind::WindowHandle, thresholds.max_window_handles),
            (ResourceKind::ProcessHandle, thresholds.max_process_handles),
            (ResourceKind::Thread, thresholds.max_threads),
        ];
        for (kind, limit) in checks {
            let active = self.active(kind);
            if active > limit {
                return Some(format!("{}: {active} > {limit}", kind.name()));
            }
        }
        let memory_mb = self.memory_usage_mb();
        if memory_mb > thresholds.max_memory_mb {
            return Some(format!(
                "memory_mb: {memory_mb} > {}",
                thresholds.max_memory_mb
            ));
        }
        None
    }
}

/// Scoped owner of exactly one OS resource. The release action runs exactly
/// once, on drop or on explicit [`ScopedHandle::release`], and the monitor
/// count is decremented with it.
pub struct ScopedHandle {
    kind: ResourceKind,
    monitor: Arc<ResourceMonitor>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ScopedHandle {
    pub fn new(
        monitor: Arc<ResourceMonitor>,
        kind: ResourceKind,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        monitor.acquire(kind);
        Self {
            kind,
            monitor,
            release: Some(Box::new(release)),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Release early instead of waiting for scope exit.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            self.monitor.release(self.kind);
        }
    }
}

impl Drop for ScopedHandle {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for ScopedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedHandle")
            .field("kind", &self.kind)
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use std::sync::atomic::AtomicBool as TestFlag;

    #[test]
    fn scoped_handle_releases_on_drop() {
        let monitor = Arc::new(ResourceMonitor::new(true));
        let released = Arc::new(TestFlag::new(false));
        let released_clone = Arc::clone(&released);
        {
            let _handle = ScopedHandle::new(
                Arc::clone(&monitor),
                ResourceKind::WindowHandle,
                move || released_clone.store(true, Ordering::SeqCst),
            );
            assert_eq!(monitor.active(ResourceKind::WindowHandle), 1);
            assert!(!released.load(Ordering::SeqCst));
        }
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(monitor.active(ResourceKind::WindowHandle), 0);
        assert_eq!(monitor.peak(ResourceKind::WindowHandle), 1);
    }

    #[test]
    fn explicit_release_runs_action_once() {
        let monitor = Arc::new(ResourceMonitor::new(true));
        let count = Arc::new(AtomicU64::new(0));
        let count_clone = Arc::clone(&count);
        let handle = ScopedHandle::new(Arc::clone(&monitor), ResourceKind::FileHandle, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        handle.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.active(ResourceKind::FileHandle), 0);
    }

    #[test]
    fn threshold_check_reports_first_violation() {
        let monitor = ResourceMonitor::new(true);
        let thresholds = ResourceThresholds {
            max_file_handles: 1,
            ..Default::default()
        };
        assert_eq!(monitor.check_thresholds(&thresholds), None);

        monitor.acquire(ResourceKind::FileHandle);
        monitor.acquire(ResourceKind::FileHandle);
        let violation = monitor.check_thresholds(&thresholds).expect("violation");
        assert!(violation.contains("file_handles"));
    }

    #[test]
    fn disabled_monitor_counts_nothing() {
        let monitor = ResourceMonitor::new(false);
        monitor.acquire(ResourceKind::Thread);
        assert_eq!(monitor.active(ResourceKind::Thread), 0);
        assert_eq!(monitor.check_thresholds(&ResourceThresholds::default()), None);
    }

    #[test]
    fn memory_accounting_is_saturating() {
        let monitor = ResourceMonitor::new(true);
        monitor.add_memory(3 * 1024 * 1024);
        assert_eq!(monitor.memory_usage_mb(), 3);
        monitor.remove_memory(10 * 1024 * 1024);
        assert_eq!(monitor.memory_usage_mb(), 0);
    }
}
