//! Notice bus — typed replacement for the `CustomEvent` dispatches the WB
//! components bubble through the DOM (`wb-event-logged`, `wb-events-cleared`,
//! `wb-filter-changed`, and the `wb-status:*` family).
//!
//! Listeners are plain callbacks. A listener that logs back into the sink
//! is dropped by the sink's reentrancy guard, so subscribing a logger here
//! cannot create a feedback loop.

use crate::capture::Severity;
use crate::sink::LogEntry;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Notification emitted by the sink or the status bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notice {
    /// A finalized entry entered the buffer (`wb-event-logged`).
    EventLogged { entry: LogEntry },

    /// The buffer was cleared (`wb-events-cleared`).
    EventsCleared,

    /// Active severity filters or search term changed (`wb-filter-changed`).
    FilterChanged {
        filters: Vec<Severity>,
        search: String,
    },

    /// A toast was queued (`wb-status:event-added`).
    StatusEventAdded { message: String, severity: Severity },

    /// A toast became visible (`wb-status:event-shown`).
    StatusEventShown { message: String, severity: Severity },

    /// A toast finished its fade-out (`wb-status:event-hidden`).
    StatusEventHidden { message: String, severity: Severity },

    /// A settings readout changed (`wb-status:setting-updated`).
    SettingUpdated {
        key: String,
        value: String,
        is_error: bool,
    },
}

/// Subscriber callback.
pub type Listener = Arc<dyn Fn(&Notice) + Send + Sync>;

/// Fanout point for notices.
#[derive(Default)]
pub struct NoticeHub {
    listeners: Mutex<Vec<Listener>>,
}

impl NoticeHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for all notices.
    pub fn subscribe(&self, listener: Listener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.len()
    }

    /// Deliver a notice to every listener, in subscription order.
    ///
    /// The listener list is snapshotted before delivery, so a listener may
    /// call back into a subscribing or emitting API without blocking on the
    /// hub's own lock.
    pub fn emit(&self, notice: &Notice) {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.clone()
        };
        for listener in &snapshot {
            listener(notice);
        }
    }
}

impl std::fmt::Debug for NoticeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoticeHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
