//! Configuration for the diagnostics pipeline.
//!
//! Two layers, mirroring how the WB custom elements are configured:
//!
//! 1. A TOML config file with serde defaults. Load failures warn and fall
//!    back to defaults; a missing config never blocks capture.
//! 2. Per-element attribute overrides (`data-max-events`, `max-events`,
//!    `event-duration`, ...) applied on top via [`EventLogConfig::apply_attributes`]
//!    and [`StatusOptions::apply_attributes`].

use crate::capture::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Log line rendering mode for the event panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    /// Truncate long lines at `wrap_length`.
    #[default]
    Truncate,
    /// Wrap long lines instead of truncating.
    Wrap,
}

/// Output format for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output for interactive use.
    #[default]
    Pretty,
    /// JSON lines for CI and ops tooling.
    Json,
}

// =============================================================================
// Event log configuration
// =============================================================================

/// Configuration for the event sink and panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Hard cap on buffered entries; oldest evicted past this.
    pub max_events: usize,
    /// Whether the panel scrolls to the newest entry on insert.
    pub auto_scroll: bool,
    /// Severities visible by default.
    pub default_filters: Vec<Severity>,
    /// Long-line handling in the panel.
    pub wrap_mode: WrapMode,
    /// Truncation width when `wrap_mode` is `Truncate`.
    pub wrap_length: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            max_events: 1000,
            auto_scroll: true,
            default_filters: vec![Severity::Error, Severity::Info],
            wrap_mode: WrapMode::default(),
            wrap_length: 80,
        }
    }
}

impl EventLogConfig {
    /// Load from a TOML file, warning and falling back to defaults on any
    /// read or parse failure.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to parse event log config, using defaults");
                    Self::default()
                }
            },
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read event log config, using defaults");
                Self::default()
            }
        }
    }

    /// Apply element attribute overrides (`data-max-events`,
    /// `data-auto-scroll`, `data-wrap-mode`).
    ///
    /// Unknown attributes are ignored; malformed values keep the current
    /// setting.
    pub fn apply_attributes(&mut self, attributes: &BTreeMap<String, String>) {
        if let Some(raw) = attributes.get("data-max-events") {
            if let Ok(value) = raw.parse::<usize>() {
                if value > 0 {
                    self.max_events = value;
                }
            }
        }
        if let Some(raw) = attributes.get("data-auto-scroll") {
            self.auto_scroll = raw != "false";
        }
        if let Some(raw) = attributes.get("data-wrap-mode") {
            match raw.as_str() {
                "wrap" => self.wrap_mode = WrapMode::Wrap,
                "truncate" => self.wrap_mode = WrapMode::Truncate,
                _ => {}
            }
        }
    }
}

// =============================================================================
// Status bar options
// =============================================================================

/// Options for the transient status toast queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusOptions {
    /// Bar height, carried through for the presentation layer.
    pub height: String,
    /// Maximum simultaneously shown toasts.
    pub max_events: usize,
    /// How long a toast stays fully visible, in milliseconds.
    pub event_duration_ms: u64,
    /// Extra delay before fade-out begins.
    pub fade_delay_ms: u64,
    /// Pacing between dequeued toasts.
    pub queue_delay_ms: u64,
    /// Whether an already-shown toast key may be shown again.
    pub show_duplicates: bool,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            height: "60px".to_string(),
            max_events: 5,
            event_duration_ms: 5000,
            fade_delay_ms: 4000,
            queue_delay_ms: 300,
            show_duplicates: false,
        }
    }
}

impl StatusOptions {
    /// Apply element attribute overrides (`height`, `max-events`,
    /// `event-duration`, `fade-delay`).
    pub fn apply_attributes(&mut self, attributes: &BTreeMap<String, String>) {
        if let Some(raw) = attributes.get("height") {
            if !raw.is_empty() {
                self.height = raw.clone();
            }
        }
        if let Some(raw) = attributes.get("max-events") {
            if let Ok(value) = raw.parse::<usize>() {
                if value > 0 {
                    self.max_events = value;
                }
            }
        }
        if let Some(raw) = attributes.get("event-duration") {
            if let Ok(value) = raw.parse::<u64>() {
                self.event_duration_ms = value;
            }
        }
        if let Some(raw) = attributes.get("fade-delay") {
            if let Ok(value) = raw.parse::<u64>() {
                self.fade_delay_ms = value;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
