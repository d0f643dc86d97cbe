//! Status bar — transient toast queue for user-facing notifications.
//!
//! Events are queued, deduplicated by `message:severity` key, and shown
//! one at a time with a pacing delay so bursts read as a sequence instead
//! of a pile. A shown toast stays visible for its duration plus the fade
//! delay, fades, and is removed half a second later.
//!
//! All timing is driven by [`StatusBar::tick`] against the injected clock;
//! the host calls it from its frame or timer loop, tests advance a manual
//! clock.

use crate::capture::Severity;
use crate::clock::Clock;
use crate::config::StatusOptions;
use crate::notices::{Listener, Notice, NoticeHub};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// How long the fade-out animation runs before the toast is removed.
pub const FADE_ANIMATION_MS: u64 = 500;

/// Once the shown-key list grows past this, it is trimmed to the most
/// recent [`SHOWN_KEYS_KEEP`], so old messages eventually reappear.
const SHOWN_KEYS_MAX: usize = 10;
const SHOWN_KEYS_KEEP: usize = 5;

// =============================================================================
// Toasts
// =============================================================================

/// Display phase of an active toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastPhase {
    Visible,
    Fading,
}

/// A toast currently on screen.
#[derive(Debug, Clone)]
pub struct Toast {
    pub message: String,
    pub severity: Severity,
    /// Dedup key, `message:severity`.
    pub event_key: String,
    pub phase: ToastPhase,
    fade_at: u64,
    remove_at: Option<u64>,
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    message: String,
    severity: Severity,
    event_key: String,
    duration_ms: u64,
    priority: i32,
}

fn event_key(message: &str, severity: Severity) -> String {
    format!("{message}:{severity}")
}

// =============================================================================
// StatusBar
// =============================================================================

struct StatusState {
    queue: Vec<QueuedEvent>,
    active: Vec<Toast>,
    /// Dedup keys of shown toasts, in display order, bounded.
    shown: Vec<String>,
    /// Next instant a queued event may be dequeued; `None` when idle.
    next_dequeue_at: Option<u64>,
    settings: BTreeMap<String, SettingReadout>,
}

/// A labeled settings readout shown in the bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingReadout {
    pub value: String,
    pub is_error: bool,
}

/// Transient notification queue with pacing, dedup, and timed fade-out.
pub struct StatusBar {
    options: StatusOptions,
    clock: Arc<dyn Clock>,
    hub: NoticeHub,
    state: Mutex<StatusState>,
}

impl StatusBar {
    #[must_use]
    pub fn new(options: StatusOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            options,
            clock,
            hub: NoticeHub::new(),
            state: Mutex::new(StatusState {
                queue: Vec::new(),
                active: Vec::new(),
                shown: Vec::new(),
                next_dequeue_at: None,
                settings: BTreeMap::new(),
            }),
        }
    }

    /// Subscribe to `wb-status:*` notices.
    pub fn subscribe(&self, listener: Listener) {
        self.hub.subscribe(listener);
    }

    /// Queue a toast with the default duration and priority.
    pub fn add_event(&self, message: impl Into<String>, severity: Severity) {
        self.add_event_with(message, severity, None, 0);
    }

    /// Queue a toast with an explicit duration and priority. Higher
    /// priority dequeues first.
    ///
    /// Silently ignored when an identical toast was already shown (unless
    /// `show_duplicates` is set) or is already waiting in the queue.
    pub fn add_event_with(
        &self,
        message: impl Into<String>,
        severity: Severity,
        duration_ms: Option<u64>,
        priority: i32,
    ) {
        let message = message.into();
        let key = event_key(&message, severity);
        let now = self.clock.now_ms();

        let mut notices = Vec::new();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            if state.shown.contains(&key) && !self.options.show_duplicates {
                debug!(%message, "duplicate status event ignored");
                return;
            }
            if state.queue.iter().any(|queued| queued.event_key == key) {
                debug!(%message, "status event already queued, ignoring");
                return;
            }

            state.queue.push(QueuedEvent {
                message: message.clone(),
                severity,
                event_key: key,
                duration_ms: duration_ms.unwrap_or(self.options.event_duration_ms),
                priority,
            });
            notices.push(Notice::StatusEventAdded {
                message,
                severity,
            });

            // An idle queue shows its first event immediately.
            if state.next_dequeue_at.is_none() {
                self.dequeue_one(&mut state, now, &mut notices);
            }
        }
        self.emit_all(notices);
    }

    /// Advance timers: fade and remove expired toasts, dequeue the next
    /// event once the pacing delay has passed.
    pub fn tick(&self) {
        let now = self.clock.now_ms();
        let mut notices = Vec::new();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            for toast in &mut state.active {
                if toast.phase == ToastPhase::Visible && now >= toast.fade_at {
                    toast.phase = ToastPhase::Fading;
                    toast.remove_at = Some(toast.fade_at + FADE_ANIMATION_MS);
                }
            }
            state.active.retain(|toast| {
                let expired = toast.remove_at.is_some_and(|at| now >= at);
                if expired {
                    notices.push(Notice::StatusEventHidden {
                        message: toast.message.clone(),
                        severity: toast.severity,
                    });
                }
                !expired
            });

            let due = state.next_dequeue_at.is_none_or(|at| now >= at);
            if due {
                if state.queue.is_empty() {
                    state.next_dequeue_at = None;
                } else {
                    self.dequeue_one(&mut state, now, &mut notices);
                }
            }
        }
        self.emit_all(notices);
    }

    fn dequeue_one(&self, state: &mut StatusState, now: u64, notices: &mut Vec<Notice>) {
        // Higher priority first; stable sort keeps arrival order for ties.
        state.queue.sort_by(|a, b| b.priority.cmp(&a.priority));
        let queued = state.queue.remove(0);
        state.next_dequeue_at = Some(now + self.options.queue_delay_ms);
        if !state.shown.contains(&queued.event_key) {
            state.shown.push(queued.event_key.clone());
        }
        if state.shown.len() > SHOWN_KEYS_MAX {
            let excess = state.shown.len() - SHOWN_KEYS_KEEP;
            state.shown.drain(..excess);
        }

        // At capacity, existing toasts start fading instead of vanishing.
        let visible = state
            .active
            .iter()
            .filter(|toast| toast.phase == ToastPhase::Visible)
            .count();
        if visible >= self.options.max_events {
            for toast in &mut state.active {
                if toast.phase == ToastPhase::Visible {
                    toast.phase = ToastPhase::Fading;
                    toast.remove_at = Some(now + FADE_ANIMATION_MS);
                }
            }
        }

        state.active.push(Toast {
            message: queued.message.clone(),
            severity: queued.severity,
            event_key: queued.event_key,
            phase: ToastPhase::Visible,
            fade_at: now + queued.duration_ms + self.options.fade_delay_ms,
            remove_at: None,
        });
        notices.push(Notice::StatusEventShown {
            message: queued.message,
            severity: queued.severity,
        });
    }

    fn emit_all(&self, notices: Vec<Notice>) {
        for notice in &notices {
            self.hub.emit(notice);
        }
    }

    /// Toasts currently on screen, oldest first.
    #[must_use]
    pub fn active_toasts(&self) -> Vec<Toast> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.active.clone()
    }

    /// Events waiting to be shown.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.queue.len()
    }

    /// Forget previously shown keys, re-allowing every message.
    pub fn reset_shown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.shown.clear();
    }

    /// Drop everything: queued events, active toasts, shown keys, and any
    /// pacing deadline. Idempotent.
    pub fn clear_events(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.queue.clear();
        state.active.clear();
        state.shown.clear();
        state.next_dequeue_at = None;
    }

    // -- Settings readouts ----------------------------------------------------

    /// Update a labeled settings readout; emits `wb-status:setting-updated`.
    pub fn update_setting(&self, key: impl Into<String>, value: impl Into<String>, is_error: bool) {
        let key = key.into();
        let value = value.into();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.settings.insert(
                key.clone(),
                SettingReadout {
                    value: value.clone(),
                    is_error,
                },
            );
        }
        self.hub.emit(&Notice::SettingUpdated {
            key,
            value,
            is_error,
        });
    }

    /// Current value of a settings readout.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<SettingReadout> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.settings.get(key).cloned()
    }
}

impl std::fmt::Debug for StatusBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("StatusBar")
            .field("queued", &state.queue.len())
            .field("active", &state.active.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bar() -> (StatusBar, Arc<TestClock>) {
        let clock = TestClock::at(10_000);
        let bar = StatusBar::new(StatusOptions::default(), clock.clone());
        (bar, clock)
    }

    // -- Queue and pacing -------------------------------------------------------

    #[test]
    fn first_event_shows_immediately_rest_are_paced() {
        let (bar, clock) = bar();
        bar.add_event("saved", Severity::Success);
        bar.add_event("synced", Severity::Info);

        assert_eq!(bar.active_toasts().len(), 1);
        assert_eq!(bar.active_toasts()[0].message, "saved");
        assert_eq!(bar.queue_len(), 1);

        // Second event waits out the pacing delay.
        clock.advance(100);
        bar.tick();
        assert_eq!(bar.active_toasts().len(), 1);

        clock.advance(250);
        bar.tick();
        assert_eq!(bar.active_toasts().len(), 2);
        assert_eq!(bar.queue_len(), 0);
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let (bar, clock) = bar();
        bar.add_event("first", Severity::Info); // shown immediately
        bar.add_event_with("low", Severity::Info, None, 0);
        bar.add_event_with("urgent", Severity::Error, None, 10);

        clock.advance(300);
        bar.tick();
        let toasts = bar.active_toasts();
        assert_eq!(toasts.last().map(|t| t.message.as_str()), Some("urgent"));

        clock.advance(300);
        bar.tick();
        assert_eq!(
            bar.active_toasts().last().map(|t| t.message.as_str()),
            Some("low")
        );
    }

    // -- Dedup ------------------------------------------------------------------

    #[test]
    fn shown_event_is_never_repeated_by_default() {
        let (bar, clock) = bar();
        bar.add_event("saved", Severity::Success);
        clock.advance(60_000);
        bar.tick(); // toast long gone
        assert!(bar.active_toasts().is_empty());

        bar.add_event("saved", Severity::Success);
        assert!(bar.active_toasts().is_empty());
        assert_eq!(bar.queue_len(), 0);

        // Same message at a different severity is a different key.
        bar.add_event("saved", Severity::Info);
        assert_eq!(bar.active_toasts().len(), 1);
    }

    #[test]
    fn queued_duplicate_is_dropped() {
        let (bar, _clock) = bar();
        bar.add_event("a", Severity::Info); // shown
        bar.add_event("b", Severity::Info); // queued
        bar.add_event("b", Severity::Info); // duplicate of queued
        assert_eq!(bar.queue_len(), 1);
    }

    #[test]
    fn show_duplicates_option_allows_repeats() {
        let clock = TestClock::at(0);
        let options = StatusOptions {
            show_duplicates: true,
            ..StatusOptions::default()
        };
        let bar = StatusBar::new(options, clock.clone());
        bar.add_event("ping", Severity::Info);
        clock.advance(60_000);
        bar.tick();
        bar.add_event("ping", Severity::Info);
        assert_eq!(bar.active_toasts().len(), 1);
    }

    #[test]
    fn clear_events_drops_queue_toasts_and_shown_keys() {
        let (bar, _clock) = bar();
        bar.add_event("a", Severity::Info);
        bar.add_event("b", Severity::Info);
        bar.clear_events();
        assert!(bar.active_toasts().is_empty());
        assert_eq!(bar.queue_len(), 0);
        // Cleared keys may be shown again, and the bar is idle.
        bar.add_event("a", Severity::Info);
        assert_eq!(bar.active_toasts().len(), 1);
        bar.clear_events();
        bar.clear_events();
    }

    #[test]
    fn shown_keys_trim_so_old_messages_reappear() {
        let (bar, clock) = bar();
        for i in 0..11 {
            bar.add_event(format!("m{i}"), Severity::Info);
            clock.advance(300);
            bar.tick();
        }
        clock.advance(60_000);
        bar.tick();
        assert!(bar.active_toasts().is_empty());

        // 11 shown keys trimmed to the most recent 5 (m6..m10), so an early
        // message comes back while a recent one still dedups.
        bar.add_event("m0", Severity::Info);
        assert_eq!(bar.active_toasts().len(), 1);
        assert_eq!(bar.active_toasts()[0].message, "m0");
        bar.add_event("m8", Severity::Info);
        assert_eq!(bar.active_toasts().len(), 1);
        assert_eq!(bar.queue_len(), 0);
    }

    #[test]
    fn reset_shown_reallows_messages() {
        let (bar, clock) = bar();
        bar.add_event("once", Severity::Info);
        clock.advance(60_000);
        bar.tick();
        bar.reset_shown();
        bar.add_event("once", Severity::Info);
        assert_eq!(bar.active_toasts().len(), 1);
    }

    // -- Fade lifecycle ---------------------------------------------------------

    #[test]
    fn toast_fades_after_duration_plus_delay_then_hides() {
        let (bar, clock) = bar();
        let hidden = Arc::new(AtomicUsize::new(0));
        {
            let hidden = Arc::clone(&hidden);
            bar.subscribe(Arc::new(move |notice| {
                if matches!(notice, Notice::StatusEventHidden { .. }) {
                    hidden.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        bar.add_event("bye", Severity::Info);

        // Visible through duration + fade delay (5000 + 4000).
        clock.advance(8_999);
        bar.tick();
        assert_eq!(bar.active_toasts()[0].phase, ToastPhase::Visible);

        clock.advance(1);
        bar.tick();
        assert_eq!(bar.active_toasts()[0].phase, ToastPhase::Fading);
        assert_eq!(hidden.load(Ordering::SeqCst), 0);

        // Removed after the fade animation.
        clock.advance(FADE_ANIMATION_MS);
        bar.tick();
        assert!(bar.active_toasts().is_empty());
        assert_eq!(hidden.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn capacity_overflow_fades_existing_toasts() {
        let clock = TestClock::at(0);
        let options = StatusOptions {
            max_events: 2,
            ..StatusOptions::default()
        };
        let bar = StatusBar::new(options, clock.clone());
        for message in ["one", "two", "three"] {
            bar.add_event(message, Severity::Info);
            clock.advance(300);
            bar.tick();
        }
        let toasts = bar.active_toasts();
        // The first two started fading when the third arrived.
        let fading = toasts
            .iter()
            .filter(|t| t.phase == ToastPhase::Fading)
            .count();
        assert_eq!(fading, 2);
        assert_eq!(
            toasts
                .iter()
                .filter(|t| t.phase == ToastPhase::Visible)
                .count(),
            1
        );
    }

    // -- Notices ----------------------------------------------------------------

    #[test]
    fn lifecycle_emits_added_then_shown() {
        let (bar, _clock) = bar();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = Arc::clone(&log);
            bar.subscribe(Arc::new(move |notice| {
                let tag = match notice {
                    Notice::StatusEventAdded { .. } => "added",
                    Notice::StatusEventShown { .. } => "shown",
                    Notice::StatusEventHidden { .. } => "hidden",
                    _ => "other",
                };
                log.lock().unwrap().push(tag);
            }));
        }
        bar.add_event("hello", Severity::Info);
        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["added", "shown"]);
    }

    // -- Settings ---------------------------------------------------------------

    #[test]
    fn settings_readout_updates_and_notifies() {
        let (bar, _clock) = bar();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            bar.subscribe(Arc::new(move |notice| {
                if let Notice::SettingUpdated { key, is_error, .. } = notice {
                    assert_eq!(key, "grid");
                    assert!(!is_error);
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        bar.update_setting("grid", "on", false);
        assert_eq!(
            bar.setting("grid"),
            Some(SettingReadout {
                value: "on".to_string(),
                is_error: false
            })
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
