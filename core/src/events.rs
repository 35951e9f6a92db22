//! Lightweight pub/sub for orchestration events with optional bounded
//! history and per-type counters.
//!
//! Dispatch happens over a copy of the listener list so listeners may
//! register or unregister from their own callbacks; a panicking listener is
//! logged and never aborts dispatch to the rest.

// Poisoned locks should fail the program.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use chrono::DateTime;
use chrono::Utc;
use tracing::debug;
use tracing::error;

use deskpilot_protocol::EventData;
use deskpilot_protocol::OrchestratorEvent;

pub type EventListener = Arc<dyn Fn(&EventData) + Send + Sync>;
pub type EventFilter = Arc<dyn Fn(&EventData) -> bool + Send + Sync>;

enum Subscription {
    All,
    Type(OrchestratorEvent),
    Filtered(EventFilter),
}

struct ListenerEntry {
    subscription: Subscription,
    listener: EventListener,
}

#[derive(Debug, Clone, Default)]
pub struct EventStatistics {
    pub counts: HashMap<OrchestratorEvent, u64>,
    pub total: u64,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
}

pub struct EventBus {
    listeners: Mutex<Vec<Arc<ListenerEntry>>>,
    history: Mutex<VecDeque<EventData>>,
    history_enabled: AtomicBool,
    max_history: usize,
    statistics: Mutex<EventStatistics>,
}

impl EventBus {
    pub fn new(history_enabled: bool, max_history: usize) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            history_enabled: AtomicBool::new(history_enabled),
            max_history: max_history.max(1),
            statistics: Mutex::new(EventStatistics::default()),
        }
    }

    pub fn add_listener(&self, listener: EventListener) {
        self.listeners.lock().unwrap().push(Arc::new(ListenerEntry {
            subscription: Subscription::All,
            listener,
        }));
    }

    pub fn add_typed_listener(&self, kind: OrchestratorEvent, listener: EventListener) {
        self.listeners.lock().unwrap().push(Arc::new(ListenerEntry {
            subscription: Subscription::Type(kind),
            listener,
        }));
    }

    pub fn add_filtered_listener(&self, filter: EventFilter, listener: EventListener) {
        self.listeners.lock().unwrap().push(Arc::new(ListenerEntry {
            subscription: Subscription::Filtered(filter),
            listener,
        }));
    }

    pub fn remove_all_listeners(&self) {
        self.listeners.lock().unwrap().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Record the event, then invoke matching listeners outside any lock.
    pub fn raise(&self, event: EventData) {
        debug!(kind = ?event.kind, data = %event.data, "event raised");

        {
            let mut statistics = self.statistics.lock().unwrap();
            *statistics.counts.entry(event.kind).or_insert(0) += 1;
            statistics.total += 1;
            if statistics.first_event.is_none() {
                statistics.first_event = Some(event.timestamp);
            }
            statistics.last_event = Some(event.timestamp);
        }

        if self.history_enabled.load(Ordering::SeqCst) {
            let mut history = self.history.lock().unwrap();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let listeners: Vec<Arc<ListenerEntry>> = self.listeners.lock().unwrap().clone();
        for entry in listeners {
            let matches = match &entry.subscription {
                Subscription::All => true,
                Subscription::Type(kind) => *kind == event.kind,
                Subscription::Filtered(filter) => filter(&event),
            };
            if !matches {
                continue;
            }
            let listener = Arc::clone(&entry.listener);
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(kind = ?event.kind, "event listener panicked");
            }
        }
    }

    pub fn raise_simple(&self, kind: OrchestratorEvent, data: impl Into<String>) {
        self.raise(EventData::new(kind, data));
    }

    pub fn raise_for_request(
        &self,
        kind: OrchestratorEvent,
        data: impl Into<String>,
        request_id: &str,
    ) {
        self.raise(EventData::for_request(kind, data, request_id));
    }

    pub fn set_history_enabled(&self, enabled: bool) {
        self.history_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.history.lock().unwrap().clear();
        }
    }

    pub fn history(&self) -> Vec<EventData> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    pub fn history_of(&self, kind: OrchestratorEvent) -> Vec<EventData> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }

    pub fn statistics(&self) -> EventStatistics {
        self.statistics.lock().unwrap().clone()
    }

    pub fn reset_statistics(&self) {
        *self.statistics.lock().unwrap() = EventStatistics::default();
    }
}
