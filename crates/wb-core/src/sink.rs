//! Event sink — the single authoritative buffer of log entries.
//!
//! The sink owns every durable entry: captures come in from the interceptor
//! layer, get sanitized and bounded, and live in a newest-first buffer until
//! overflow eviction or an explicit clear. Three defenses keep the sink from
//! observing itself:
//!
//! - a reentrancy guard drops any capture made while one is already being
//!   processed (console wrapping can call back into logging);
//! - a self-reference filter silently drops records naming the sink's own
//!   tag or a stack-overflow condition;
//! - pipeline failures are reported through the untouched fallback console,
//!   never through the sink.
//!
//! Entry lifecycle: captured → sanitized/stored → [visible | filtered-out]
//! → evicted (overflow) | cleared (explicit). No transition back.

use crate::capture::{CaptureContext, CaptureKind, CaptureRecord, SINK_TAG, Severity};
use crate::clock::{Clock, SystemClock};
use crate::config::EventLogConfig;
use crate::entry_id::generate_id;
use crate::error::Result;
use crate::interceptor::{ConsoleSink, NullConsole};
use crate::notices::{Listener, Notice, NoticeHub};
use crate::sanitize::{sanitize_context, truncate_message};
use crate::storage_guard::{KeyValueStore, StorageGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Window within which identical navigation records are considered
/// duplicates of one another.
pub const NAVIGATION_DEDUP_WINDOW_MS: u64 = 1000;

/// Messages carrying this marker indicate runaway recursion and are dropped
/// without a trace.
const STACK_OVERFLOW_MARKER: &str = "Maximum call stack";

// =============================================================================
// LogEntry
// =============================================================================

/// The sanitized, durable, buffer-resident representation of a capture.
///
/// Immutable once stored, except for the UI-only `expanded` flag which the
/// presentation layer toggles through [`EventSink::toggle_expanded`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Process-unique identifier.
    pub id: String,
    pub severity: Severity,
    /// Bounded message (200 chars plus ellipsis).
    pub message: String,
    /// Untruncated message, kept only when truncation happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_message: Option<String>,
    /// Source label (`console`, `fetch`, `navigation`, ...).
    pub source: String,
    /// Provenance: where the event came from.
    pub from: String,
    /// Provenance: what the event targeted.
    pub to: String,
    /// Sanitized kind-specific payload.
    pub context: CaptureContext,
    pub timestamp_ms: u64,
    /// UI-only expansion state; never touched by the sink pipeline.
    pub expanded: bool,
}

impl LogEntry {
    /// Wall-clock capture instant.
    #[must_use]
    pub fn captured_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        i64::try_from(self.timestamp_ms)
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
    }

    /// `HH:MM:SS` timestamp the log panel renders next to each entry.
    #[must_use]
    pub fn display_time(&self) -> String {
        self.captured_at()
            .map_or_else(|| "??:??:??".to_string(), |t| t.format("%H:%M:%S").to_string())
    }
}

// =============================================================================
// Sink statistics
// =============================================================================

/// Counters describing sink activity since creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkStats {
    /// Entries currently buffered.
    pub len: usize,
    /// Captures that became stored entries.
    pub total_stored: u64,
    /// Entries removed by overflow eviction.
    pub total_evicted: u64,
    /// Captures dropped by the reentrancy guard.
    pub dropped_reentrant: u64,
    /// Captures dropped by the self-reference filter.
    pub dropped_self_reference: u64,
    /// Navigation captures dropped as near-duplicates.
    pub dropped_duplicate: u64,
}

// =============================================================================
// EventSink
// =============================================================================

struct SinkState {
    /// Newest-first buffer; eviction pops from the back.
    entries: VecDeque<LogEntry>,
    filters: BTreeSet<Severity>,
    search: String,
    paused: bool,
    stats: SinkStats,
}

/// The single authoritative buffer of [`LogEntry`] values.
///
/// Thread-safe: internal state lives behind a Mutex. The reentrancy guard
/// is a logical-recursion check, valid because callers are expected to run
/// on one event loop; a truly concurrent second capture is dropped, not
/// blocked.
pub struct EventSink {
    config: EventLogConfig,
    clock: Arc<dyn Clock>,
    /// The untouched original console, used for every failure report so the
    /// sink never reports through itself.
    fallback: Box<dyn ConsoleSink>,
    store: Option<Mutex<Box<dyn KeyValueStore>>>,
    guard: StorageGuard,
    processing: AtomicBool,
    guard_reported: AtomicBool,
    hub: NoticeHub,
    state: Mutex<SinkState>,
}

impl EventSink {
    /// Create a sink with the given configuration, the system clock, a
    /// no-op fallback console, and no storage backend.
    #[must_use]
    pub fn new(config: EventLogConfig) -> Self {
        let filters: BTreeSet<Severity> = config.default_filters.iter().copied().collect();
        Self {
            config,
            clock: Arc::new(SystemClock),
            fallback: Box::new(NullConsole),
            store: None,
            guard: StorageGuard::default(),
            processing: AtomicBool::new(false),
            guard_reported: AtomicBool::new(false),
            hub: NoticeHub::new(),
            state: Mutex::new(SinkState {
                entries: VecDeque::new(),
                filters,
                search: String::new(),
                paused: false,
                stats: SinkStats::default(),
            }),
        }
    }

    /// Replace the clock (tests drive a manual clock).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the untouched console used for failure reporting.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Box<dyn ConsoleSink>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Attach a key/value store; every capture then runs the storage guard
    /// probe against it.
    #[must_use]
    pub fn with_store(mut self, store: Box<dyn KeyValueStore>) -> Self {
        self.store = Some(Mutex::new(store));
        self
    }

    /// Override the storage guard thresholds.
    #[must_use]
    pub fn with_storage_guard(mut self, guard: StorageGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Subscribe to sink notices (`wb-event-logged`, `wb-events-cleared`,
    /// `wb-filter-changed`).
    pub fn subscribe(&self, listener: Listener) {
        self.hub.subscribe(listener);
    }

    // -- Capture path ---------------------------------------------------------

    /// Add an event from an explicit severity/message/context triple.
    ///
    /// Returns the stored entry, or `None` when the capture was dropped
    /// (paused, reentrant, self-referential, or a navigation duplicate).
    pub fn add_event(
        &self,
        severity: Severity,
        message: impl Into<String>,
        context: CaptureContext,
    ) -> Option<LogEntry> {
        let record = CaptureRecord::new(severity, message, context, self.clock.now_ms());
        self.capture(record)
    }

    /// Ingest a capture record from the interceptor layer.
    pub fn capture(&self, record: CaptureRecord) -> Option<LogEntry> {
        // Reentrancy guard: a capture made while one is being processed is
        // logical recursion (console wrapping observing the pipeline's own
        // output) and is dropped. Reported once, via the untouched console.
        if self.processing.swap(true, Ordering::SeqCst) {
            if !self.guard_reported.swap(true, Ordering::SeqCst) {
                self.fallback
                    .warn("wb-core: nested capture dropped by reentrancy guard");
            }
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.stats.dropped_reentrant += 1;
            return None;
        }

        let result = self.capture_inner(record);

        // The guard clears on every path out, including failures.
        self.processing.store(false, Ordering::SeqCst);

        match result {
            Ok(entry) => entry,
            Err(err) => {
                self.fallback
                    .error(&format!("wb-core: capture pipeline failed: {err}"));
                None
            }
        }
    }

    fn capture_inner(&self, record: CaptureRecord) -> Result<Option<LogEntry>> {
        let now = record.timestamp_ms;

        let stored = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            if state.paused {
                return Ok(None);
            }

            // Self-reference filter: anything naming the sink itself, or a
            // stack-overflow condition, is swallowed without a trace.
            if Self::is_self_referential(&record) {
                state.stats.dropped_self_reference += 1;
                return Ok(None);
            }

            // Navigation APIs fire several near-identical events per
            // transition; keep only the first within the window.
            if Self::is_recent_navigation_duplicate(&state.entries, &record, now) {
                state.stats.dropped_duplicate += 1;
                debug!(message = %record.message, "duplicate navigation event suppressed");
                return Ok(None);
            }

            let (message, original_message) = truncate_message(&record.message);
            let mut context = record.context;
            sanitize_context(&mut context);

            // App contexts carry their own source label; everything else is
            // labeled by the record's kind (XHR shares the HTTP context
            // shape but keeps its own label).
            let source = match &context {
                CaptureContext::App { .. } => context.source_label(),
                _ => record.kind.source_label().to_string(),
            };
            let from = record.from.unwrap_or_else(|| context.default_origin());
            let to = record.to.unwrap_or_else(|| context.default_target());

            let entry = LogEntry {
                id: generate_id(now),
                severity: record.severity,
                message,
                original_message,
                source,
                from,
                to,
                context,
                timestamp_ms: now,
                expanded: false,
            };

            state.entries.push_front(entry.clone());
            state.stats.total_stored += 1;
            while state.entries.len() > self.config.max_events {
                if let Some(evicted) = state.entries.pop_back() {
                    state.stats.total_evicted += 1;
                    trace!(id = %evicted.id, "entry evicted on overflow");
                }
            }

            entry
        };

        // Best-effort persistence headroom check; failures degrade to a
        // warning on the structured log, never to the page.
        self.run_storage_guard();

        // Notify listeners outside the state lock. The reentrancy flag is
        // still set here, so a listener logging back into the sink is
        // dropped rather than recursing.
        self.hub.emit(&Notice::EventLogged {
            entry: stored.clone(),
        });

        Ok(Some(stored))
    }

    fn is_self_referential(record: &CaptureRecord) -> bool {
        if record.message.contains(SINK_TAG) || record.message.contains(STACK_OVERFLOW_MARKER) {
            return true;
        }
        match &record.context {
            CaptureContext::App {
                source: Some(source),
            } => source.contains(SINK_TAG),
            _ => false,
        }
    }

    fn is_recent_navigation_duplicate(
        entries: &VecDeque<LogEntry>,
        record: &CaptureRecord,
        now: u64,
    ) -> bool {
        if record.kind != CaptureKind::Navigation || record.severity != Severity::Info {
            return false;
        }
        let (bounded, _) = truncate_message(&record.message);
        entries
            .iter()
            .take_while(|entry| now.saturating_sub(entry.timestamp_ms) < NAVIGATION_DEDUP_WINDOW_MS)
            .any(|entry| {
                entry.severity == Severity::Info
                    && entry.source == "navigation"
                    && entry.message == bounded
            })
    }

    fn run_storage_guard(&self) {
        if let Some(store) = &self.store {
            let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(report) = self.guard.check(store.as_mut()) {
                warn!(
                    removed = report.keys_removed(),
                    reclaimed = report.bytes_reclaimed,
                    "storage quota exceeded, emergency cleanup ran"
                );
            }
        }
    }

    // -- Buffer access --------------------------------------------------------

    /// Number of buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, newest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.iter().cloned().collect()
    }

    /// Entries passing the active filter/search predicate, newest first.
    #[must_use]
    pub fn visible_entries(&self) -> Vec<LogEntry> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .entries
            .iter()
            .filter(|entry| Self::entry_visible(&state.filters, &state.search, entry))
            .cloned()
            .collect()
    }

    /// Whether an entry passes the active filter/search predicate.
    #[must_use]
    pub fn is_visible(&self, entry: &LogEntry) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::entry_visible(&state.filters, &state.search, entry)
    }

    fn entry_visible(filters: &BTreeSet<Severity>, search: &str, entry: &LogEntry) -> bool {
        if !filters.contains(&entry.severity) {
            return false;
        }
        if search.is_empty() {
            return true;
        }
        let term = search.to_lowercase();
        entry.message.to_lowercase().contains(&term)
            || entry.source.to_lowercase().contains(&term)
            || entry.severity.label().contains(&term)
    }

    /// Sink activity counters.
    #[must_use]
    pub fn stats(&self) -> SinkStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = state.stats.clone();
        stats.len = state.entries.len();
        stats
    }

    // -- Control surface ------------------------------------------------------

    /// Empty the buffer. Idempotent; emits `wb-events-cleared`.
    pub fn clear_events(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.entries.clear();
        }
        self.hub.emit(&Notice::EventsCleared);
    }

    /// Pause or resume capture. Paused sinks drop records on arrival.
    pub fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.paused = paused;
    }

    /// Whether capture is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.paused
    }

    /// Update the search term; emits `wb-filter-changed`.
    pub fn set_search(&self, term: impl Into<String>) {
        let notice = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.search = term.into();
            Self::filter_notice(&state)
        };
        self.hub.emit(&notice);
    }

    /// Toggle a severity filter on or off; emits `wb-filter-changed`.
    pub fn toggle_filter(&self, severity: Severity) {
        let notice = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.filters.remove(&severity) {
                state.filters.insert(severity);
            }
            Self::filter_notice(&state)
        };
        self.hub.emit(&notice);
    }

    fn filter_notice(state: &SinkState) -> Notice {
        Notice::FilterChanged {
            filters: state.filters.iter().copied().collect(),
            search: state.search.clone(),
        }
    }

    /// Toggle an entry's UI expansion state. Returns the new state, or
    /// `None` when the id is unknown.
    pub fn toggle_expanded(&self, id: &str) -> Option<bool> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.iter_mut().find(|e| e.id == id).map(|entry| {
            entry.expanded = !entry.expanded;
            entry.expanded
        })
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("max_events", &self.config.max_events)
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
