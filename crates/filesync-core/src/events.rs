//! Event infrastructure for filesync-core.
//!
//! `SyncEvent` describes what a pass did; `EventBus` hands it to listeners.
//! Subscribers can use `DocumentMerged.origin` to ignore document changes that
//! came from the file, so they don't echo them back.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use web_time::{SystemTime, UNIX_EPOCH};

use crate::reconcile::SyncAction;

/// Events emitted by the reconciler, one or two per pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// External file edits were merged into the document.
    DocumentMerged {
        /// File name
        name: String,
        /// Commit origin the merge was tagged with
        origin: String,
        /// Number of edit ops applied
        ops: usize,
        /// When the merge happened, in milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// A pass finished.
    PassCompleted {
        name: String,
        action: SyncAction,
        /// Whether the file on disk was created or rewritten
        #[serde(rename = "fileWritten")]
        file_written: bool,
        timestamp: f64,
    },
    /// A pass was aborted; the next one starts over.
    PassFailed {
        name: String,
        error: String,
        timestamp: f64,
    },
}

/// Current time in milliseconds since Unix epoch.
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

impl SyncEvent {
    /// File the event is about
    pub fn name(&self) -> &str {
        match self {
            SyncEvent::DocumentMerged { name, .. }
            | SyncEvent::PassCompleted { name, .. }
            | SyncEvent::PassFailed { name, .. } => name,
        }
    }
}

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Keeps a listener registered; dropping it removes the listener.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

/// Fan-out of pass events to listeners, optionally scoped to one file.
#[derive(Default)]
pub struct EventBus {
    /// id -> (file filter, listener)
    listeners: RwLock<BTreeMap<u64, (Option<String>, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to events for every file.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(None, Arc::new(listener))
    }

    /// Listen to events for `name` only.
    pub fn subscribe_file(
        self: &Arc<Self>,
        name: &str,
        listener: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(Some(name.to_string()), Arc::new(listener))
    }

    fn add(self: &Arc<Self>, filter: Option<String>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, (filter, listener));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn remove(&self, id: u64) {
        // Drop may run while `emit` holds the read lock on this thread.
        if let Ok(mut listeners) = self.listeners.try_write() {
            listeners.remove(&id);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver `event` to every listener whose filter matches, in
    /// registration order.
    pub fn emit(&self, event: &SyncEvent) {
        // Snapshot first so a listener may subscribe without deadlocking.
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|(filter, _)| filter.as_deref().is_none_or(|n| n == event.name()))
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in matching {
            listener(event);
        }
    }
}
