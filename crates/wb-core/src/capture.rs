//! Capture records — raw observations produced by the interceptor layer.
//!
//! A [`CaptureRecord`] is the ephemeral form of an observation: what was
//! seen (kind), how bad it was (severity), a human-readable message, and a
//! kind-specific context payload. The event sink turns captures into
//! durable, sanitized [`crate::sink::LogEntry`] values.
//!
//! The context is a tagged union per capture kind rather than an open
//! string-keyed bag, so each interceptor can only attach the fields that
//! actually exist for its hook.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use url::Url;

/// Tag substring identifying the sink's own output.
///
/// Any capture whose message or source contains this tag is dropped before
/// it can re-enter the pipeline.
pub const SINK_TAG: &str = "wb-event-log";

// =============================================================================
// Severity
// =============================================================================

/// Severity of a captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
    Debug,
    User,
}

impl Severity {
    /// All severities, in display order.
    pub const ALL: [Severity; 6] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Success,
        Severity::Debug,
        Severity::User,
    ];

    /// Lowercase label used by filters and search.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
            Self::Debug => "debug",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "success" => Ok(Self::Success),
            "debug" => Ok(Self::Debug),
            "user" => Ok(Self::User),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

// =============================================================================
// Capture kinds and contexts
// =============================================================================

/// What produced a capture record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureKind {
    Console,
    Fetch,
    Xhr,
    Navigation,
    WindowError,
    PromiseRejection,
    ResourceError,
    /// Application-dispatched WB event (`wb:info`, `wb:error`, ...).
    App,
}

impl CaptureKind {
    /// Source label recorded on stored entries.
    #[must_use]
    pub fn source_label(self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Fetch => "fetch",
            Self::Xhr => "xhr",
            Self::Navigation => "navigation",
            Self::WindowError => "window-error",
            Self::PromiseRejection => "promise-rejection",
            Self::ResourceError => "resource-error",
            Self::App => "app",
        }
    }
}

/// Navigation transition variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavType {
    PushState,
    ReplaceState,
    PopState,
    HashChange,
    Scroll,
}

/// Kind-specific capture payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CaptureContext {
    /// Console method invocation.
    Console,

    /// HTTP request outcome (fetch-style or XHR-style path).
    Http {
        url: String,
        method: String,
        /// Response status; `None` for transport-level failures.
        status: Option<u16>,
        status_text: Option<String>,
        duration_ms: u64,
        /// Response headers at settle time.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        /// Request headers captured at call time.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        request_headers: BTreeMap<String, String>,
        /// Call-site stack text captured before dispatch.
        #[serde(skip_serializing_if = "Option::is_none")]
        stack_trace: Option<String>,
        /// Reconstructed triggering call, for display.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Transport error message, when the request never settled.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// History/scroll transition.
    Navigation {
        nav_type: NavType,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
        scroll_y: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_scroll_y: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        scroll_delta: Option<i64>,
        /// History state payload, serialized by the caller.
        #[serde(skip_serializing_if = "Option::is_none")]
        state_json: Option<String>,
    },

    /// Uncaught page exception.
    WindowError {
        filename: String,
        line: u32,
        col: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },

    /// Unhandled promise rejection.
    PromiseRejection {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },

    /// Resource (image/script/stylesheet) load failure.
    ResourceError {
        url: String,
        resource_type: String,
        /// Raw element HTML; stripped during sanitization.
        #[serde(skip_serializing_if = "Option::is_none")]
        element_html: Option<String>,
    },

    /// Application-dispatched WB event with a free-form source label.
    App {
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
}

impl CaptureContext {
    /// The capture kind this context belongs to.
    #[must_use]
    pub fn kind(&self) -> CaptureKind {
        match self {
            Self::Console => CaptureKind::Console,
            // Http carries its concrete kind on the record, defaulting to fetch
            Self::Http { .. } => CaptureKind::Fetch,
            Self::Navigation { .. } => CaptureKind::Navigation,
            Self::WindowError { .. } => CaptureKind::WindowError,
            Self::PromiseRejection { .. } => CaptureKind::PromiseRejection,
            Self::ResourceError { .. } => CaptureKind::ResourceError,
            Self::App { .. } => CaptureKind::App,
        }
    }

    /// Source label for a stored entry.
    #[must_use]
    pub fn source_label(&self) -> String {
        match self {
            Self::App {
                source: Some(source),
            } => source.clone(),
            Self::App { source: None } => "unknown".to_string(),
            other => other.kind().source_label().to_string(),
        }
    }

    /// Default `from` provenance when the capture did not supply one.
    #[must_use]
    pub fn default_origin(&self) -> String {
        match self {
            Self::Http {
                stack_trace: Some(stack),
                ..
            } => extract_caller_from_stack(stack),
            Self::WindowError { filename, line, .. } => format!("{filename}:{line}"),
            Self::PromiseRejection { .. } => "promise".to_string(),
            Self::ResourceError { .. } => "html-element".to_string(),
            _ => "unknown".to_string(),
        }
    }

    /// Default `to` provenance when the capture did not supply one.
    #[must_use]
    pub fn default_target(&self) -> String {
        match self {
            Self::Console => "console".to_string(),
            Self::Http { url, .. } | Self::ResourceError { url, .. } => url.clone(),
            Self::Navigation { url, .. } => short_url(url),
            Self::WindowError { .. } => "error-handler".to_string(),
            Self::PromiseRejection { .. } => "rejection-handler".to_string(),
            Self::App { .. } => "application".to_string(),
        }
    }
}

// =============================================================================
// CaptureRecord
// =============================================================================

/// A raw observation synthesized by the interceptor layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub kind: CaptureKind,
    pub severity: Severity,
    /// Arbitrary length at capture time; truncated by the sink.
    pub message: String,
    pub context: CaptureContext,
    /// Capture instant, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Where the event came from; derived from context when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// What the event targeted; derived from context when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl CaptureRecord {
    /// Create a record with provenance left for the sink to derive.
    #[must_use]
    pub fn new(
        severity: Severity,
        message: impl Into<String>,
        context: CaptureContext,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            kind: context.kind(),
            severity,
            message: message.into(),
            context,
            timestamp_ms,
            from: None,
            to: None,
        }
    }

    /// Override the capture kind (XHR shares the HTTP context shape).
    #[must_use]
    pub fn with_kind(mut self, kind: CaptureKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set explicit `from` provenance.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set explicit `to` provenance.
    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }
}

// =============================================================================
// Provenance helpers
// =============================================================================

// "at fn (path/file.js:12:3)" -> capture path and line
static CALLER_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"at .* \((.+):(\d+):(\d+)\)").unwrap());

/// Extract a `file:line` caller description from stack text.
///
/// Skips the first frames (capture machinery) and any frame inside the
/// sink itself; falls back to `"unknown"` when nothing usable remains.
#[must_use]
pub fn extract_caller_from_stack(stack: &str) -> String {
    for line in stack.lines().skip(3) {
        let line = line.trim();
        if line.is_empty() || line.contains(SINK_TAG) || line.contains("XMLHttpRequest") {
            continue;
        }
        if let Some(caps) = CALLER_FRAME.captures(line) {
            let file = caps.get(1).map_or("", |m| m.as_str());
            let line_num = caps.get(2).map_or("", |m| m.as_str());
            let file_name = file.rsplit('/').next().unwrap_or(file);
            return format!("{file_name}:{line_num}");
        }
    }
    "unknown".to_string()
}

/// Shorten a URL to `path + query + hash` for compact provenance display.
///
/// Unparseable input is returned unchanged.
#[must_use]
pub fn short_url(raw: &str) -> String {
    if raw.is_empty() {
        return "unknown".to_string();
    }
    match Url::parse(raw) {
        Ok(parsed) => {
            let mut short = parsed.path().to_string();
            if let Some(query) = parsed.query() {
                short.push('?');
                short.push_str(query);
            }
            if let Some(fragment) = parsed.fragment() {
                short.push('#');
                short.push_str(fragment);
            }
            short
        }
        Err(_) => raw.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Severity ---------------------------------------------------------------

    #[test]
    fn severity_roundtrips_through_str() {
        for severity in Severity::ALL {
            let parsed: Severity = severity.label().parse().unwrap();
            assert_eq!(parsed, severity);
        }
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn severity_serializes_snake_case() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }

    // -- Contexts ---------------------------------------------------------------

    #[test]
    fn context_kind_mapping() {
        assert_eq!(CaptureContext::Console.kind(), CaptureKind::Console);
        let nav = CaptureContext::Navigation {
            nav_type: NavType::PushState,
            url: "https://example.com/a".to_string(),
            previous_url: None,
            hash: None,
            scroll_y: 0,
            previous_scroll_y: None,
            scroll_delta: None,
            state_json: None,
        };
        assert_eq!(nav.kind(), CaptureKind::Navigation);
        assert_eq!(nav.source_label(), "navigation");
    }

    #[test]
    fn app_context_uses_supplied_source() {
        let ctx = CaptureContext::App {
            source: Some("wb-color-picker".to_string()),
        };
        assert_eq!(ctx.source_label(), "wb-color-picker");
        assert_eq!(
            CaptureContext::App { source: None }.source_label(),
            "unknown"
        );
    }

    #[test]
    fn default_targets_per_kind() {
        assert_eq!(CaptureContext::Console.default_target(), "console");
        let window_error = CaptureContext::WindowError {
            filename: "app.js".to_string(),
            line: 10,
            col: 2,
            stack: None,
        };
        assert_eq!(window_error.default_target(), "error-handler");
        assert_eq!(window_error.default_origin(), "app.js:10");
    }

    #[test]
    fn record_builder_overrides() {
        let record = CaptureRecord::new(Severity::Error, "boom", CaptureContext::Console, 5)
            .with_kind(CaptureKind::Xhr)
            .with_from("caller.js:3")
            .with_to("/api/items");
        assert_eq!(record.kind, CaptureKind::Xhr);
        assert_eq!(record.from.as_deref(), Some("caller.js:3"));
        assert_eq!(record.to.as_deref(), Some("/api/items"));
    }

    // -- Caller extraction ------------------------------------------------------

    #[test]
    fn extracts_first_external_frame() {
        let stack = "Error\n\
                     at capture (wb-core.js:1:1)\n\
                     at wrap (wb-core.js:2:1)\n\
                     at intercepted (components/wb-event-log/wb-event-log.js:10:5)\n\
                     at loadData (src/pages/home.js:42:17)\n\
                     at main (src/index.js:3:1)";
        assert_eq!(extract_caller_from_stack(stack), "home.js:42");
    }

    #[test]
    fn caller_unknown_when_no_frames_match() {
        assert_eq!(extract_caller_from_stack(""), "unknown");
        assert_eq!(extract_caller_from_stack("Error\nat x\nat y"), "unknown");
    }

    // -- URL shortening ---------------------------------------------------------

    #[test]
    fn short_url_keeps_path_query_hash() {
        assert_eq!(
            short_url("https://example.com/docs/page?tab=2#section"),
            "/docs/page?tab=2#section"
        );
        assert_eq!(short_url("https://example.com/"), "/");
    }

    #[test]
    fn short_url_passes_through_unparseable() {
        assert_eq!(short_url("not a url"), "not a url");
        assert_eq!(short_url(""), "unknown");
    }
}
