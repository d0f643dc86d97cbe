//! Interceptor layer — explicit decorators over the page's observable
//! surfaces.
//!
//! Each interceptor wraps an underlying capability behind a trait seam
//! (console output, HTTP transport) or receives callbacks from the host
//! (navigation, page errors), synthesizes a [`CaptureRecord`], and hands it
//! to the sink. The wrapped capability always runs first and its result is
//! returned unchanged: interception never alters observable behavior.
//!
//! # Interceptors
//!
//! - [`InterceptingConsole`]: decorates a [`ConsoleSink`], mirroring every
//!   line into the event sink.
//! - [`InterceptedTransport`]: decorates an [`HttpTransport`], capturing
//!   failed requests with kind-specific failure rules.
//! - [`NavigationTracker`]: receives history/scroll callbacks, debouncing
//!   scroll noise against the injected clock.
//! - [`PageErrorHook`]: receives uncaught errors, promise rejections,
//!   resource failures, and application-dispatched WB events.

use crate::capture::{CaptureContext, CaptureKind, CaptureRecord, NavType, Severity, short_url};
use crate::clock::Clock;
use crate::sink::EventSink;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Scroll positions reported within this window collapse into one capture.
pub const SCROLL_DEBOUNCE_MS: u64 = 150;
/// Minimum vertical movement, in pixels, worth recording.
pub const SCROLL_DELTA_THRESHOLD: i64 = 200;

// =============================================================================
// Console
// =============================================================================

/// Console output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl ConsoleLevel {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }

    fn severity(self) -> Severity {
        match self {
            Self::Log | Self::Info => Severity::Info,
            Self::Warn => Severity::Warning,
            Self::Error => Severity::Error,
            Self::Debug => Severity::Debug,
        }
    }
}

/// A console-like output capability.
///
/// The sink also holds one of these as its untouched fallback channel, so
/// pipeline failures are reported without re-entering the pipeline.
pub trait ConsoleSink: Send + Sync {
    fn write(&self, level: ConsoleLevel, message: &str);

    fn log(&self, message: &str) {
        self.write(ConsoleLevel::Log, message);
    }
    fn info(&self, message: &str) {
        self.write(ConsoleLevel::Info, message);
    }
    fn warn(&self, message: &str) {
        self.write(ConsoleLevel::Warn, message);
    }
    fn error(&self, message: &str) {
        self.write(ConsoleLevel::Error, message);
    }
    fn debug(&self, message: &str) {
        self.write(ConsoleLevel::Debug, message);
    }
}

/// Console that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConsole;

impl ConsoleSink for NullConsole {
    fn write(&self, _level: ConsoleLevel, _message: &str) {}
}

/// Console that records every line, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingConsole {
    lines: Arc<Mutex<Vec<(ConsoleLevel, String)>>>,
}

impl RecordingConsole {
    /// A fresh shared recorder; clones observe the same lines.
    #[must_use]
    pub fn shared() -> Self {
        Self::default()
    }

    /// All recorded lines, in write order.
    #[must_use]
    pub fn lines(&self) -> Vec<(ConsoleLevel, String)> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.clone()
    }

    /// Messages written at the given level label.
    #[must_use]
    pub fn messages_for(&self, label: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(level, _)| level.label() == label)
            .map(|(_, message)| message)
            .collect()
    }
}

impl ConsoleSink for RecordingConsole {
    fn write(&self, level: ConsoleLevel, message: &str) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push((level, message.to_string()));
    }
}

/// Decorator that mirrors console output into the event sink.
///
/// The inner console runs first, so output reaches its destination even
/// when the sink drops the capture.
pub struct InterceptingConsole {
    inner: Box<dyn ConsoleSink>,
    sink: Arc<EventSink>,
    clock: Arc<dyn Clock>,
}

impl InterceptingConsole {
    #[must_use]
    pub fn new(inner: Box<dyn ConsoleSink>, sink: Arc<EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self { inner, sink, clock }
    }
}

impl ConsoleSink for InterceptingConsole {
    fn write(&self, level: ConsoleLevel, message: &str) {
        self.inner.write(level, message);
        let record = CaptureRecord::new(
            level.severity(),
            message,
            CaptureContext::Console,
            self.clock.now_ms(),
        );
        self.sink.capture(record);
    }
}

// =============================================================================
// HTTP transport
// =============================================================================

/// An outgoing HTTP request as seen by the interception seam.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Call-site stack text, captured by the caller before dispatch.
    pub stack_trace: Option<String>,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            stack_trace: None,
        }
    }

    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            stack_trace: None,
        }
    }
}

/// A settled HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
}

/// The underlying request capability being decorated.
///
/// `Err` means the request never settled (network failure); an error
/// status code is still `Ok`.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, String>;
}

/// Which client API style the decorated transport emulates.
///
/// The two differ in what counts as a failure: fetch-style treats anything
/// outside 2xx as an error, XHR-style only 400 and above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Fetch,
    Xhr,
}

impl ClientKind {
    fn capture_kind(self) -> CaptureKind {
        match self {
            Self::Fetch => CaptureKind::Fetch,
            Self::Xhr => CaptureKind::Xhr,
        }
    }

    fn is_failure(self, status: u16) -> bool {
        match self {
            Self::Fetch => !(200..300).contains(&status),
            Self::Xhr => status >= 400,
        }
    }

    fn failure_message(self, response: &HttpResponse, url: &str) -> String {
        match self {
            Self::Fetch => format!(
                "HTTP {} {}: {}",
                response.status, response.status_text, url
            ),
            Self::Xhr => format!(
                "XHR Error: {} {} for {}",
                response.status, response.status_text, url
            ),
        }
    }

    fn network_failure_message(self, error: &str, url: &str) -> String {
        match self {
            Self::Fetch => format!("Fetch failed: {error} for {url}"),
            Self::Xhr => format!("XHR Network Error for {url}"),
        }
    }

    fn code_snippet(self, request: &HttpRequest) -> String {
        match self {
            Self::Fetch => format!("fetch('{}')", request.url),
            Self::Xhr => format!("xhr.open('{}', '{}')", request.method, request.url),
        }
    }
}

/// Decorator that captures failed requests into the event sink.
///
/// Successful requests pass through silently; the caller always receives
/// the inner transport's result unchanged.
pub struct InterceptedTransport<T> {
    inner: T,
    kind: ClientKind,
    sink: Arc<EventSink>,
    clock: Arc<dyn Clock>,
}

impl<T: HttpTransport> InterceptedTransport<T> {
    #[must_use]
    pub fn new(inner: T, kind: ClientKind, sink: Arc<EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            kind,
            sink,
            clock,
        }
    }

    fn capture_failure(
        &self,
        request: &HttpRequest,
        response: Option<&HttpResponse>,
        error: Option<&str>,
        started_at: u64,
    ) {
        let now = self.clock.now_ms();
        let message = match (response, error) {
            (Some(response), _) => self.kind.failure_message(response, &request.url),
            (None, Some(error)) => self.kind.network_failure_message(error, &request.url),
            (None, None) => return,
        };
        let context = CaptureContext::Http {
            url: request.url.clone(),
            method: request.method.clone(),
            status: response.map(|r| r.status),
            status_text: response.map(|r| r.status_text.clone()),
            duration_ms: now.saturating_sub(started_at),
            headers: response.map(|r| r.headers.clone()).unwrap_or_default(),
            request_headers: request.headers.clone(),
            stack_trace: request.stack_trace.clone(),
            code: Some(self.kind.code_snippet(request)),
            error: error.map(str::to_string),
        };
        let record = CaptureRecord::new(Severity::Error, message, context, now)
            .with_kind(self.kind.capture_kind());
        self.sink.capture(record);
    }
}

impl<T: HttpTransport> HttpTransport for InterceptedTransport<T> {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
        let started_at = self.clock.now_ms();
        let result = self.inner.execute(request);
        match &result {
            Ok(response) => {
                if self.kind.is_failure(response.status) {
                    self.capture_failure(request, Some(response), None, started_at);
                }
            }
            Err(error) => {
                self.capture_failure(request, None, Some(error), started_at);
            }
        }
        result
    }
}

// =============================================================================
// Navigation
// =============================================================================

struct NavState {
    current_url: String,
    scroll_y: i64,
    pending_scroll: Option<PendingScroll>,
}

struct PendingScroll {
    target_y: i64,
    fire_at: u64,
}

/// Receives history and scroll callbacks and turns them into captures.
///
/// Scroll reports are debounced: a report opens (or extends) a window of
/// [`SCROLL_DEBOUNCE_MS`]; when [`NavigationTracker::tick`] observes the
/// window closed, one capture covers the whole movement, and only when the
/// net movement exceeds [`SCROLL_DELTA_THRESHOLD`].
pub struct NavigationTracker {
    sink: Arc<EventSink>,
    clock: Arc<dyn Clock>,
    state: Mutex<NavState>,
}

impl NavigationTracker {
    #[must_use]
    pub fn new(sink: Arc<EventSink>, clock: Arc<dyn Clock>, initial_url: impl Into<String>) -> Self {
        Self {
            sink,
            clock,
            state: Mutex::new(NavState {
                current_url: initial_url.into(),
                scroll_y: 0,
                pending_scroll: None,
            }),
        }
    }

    /// URL the tracker currently considers active.
    #[must_use]
    pub fn current_url(&self) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.current_url.clone()
    }

    fn transition(
        &self,
        nav_type: NavType,
        url: String,
        hash: Option<String>,
        state_json: Option<String>,
        message: String,
    ) {
        let (previous_url, scroll_y) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let previous = std::mem::replace(&mut state.current_url, url.clone());
            ((previous != url).then_some(previous), state.scroll_y)
        };
        let context = CaptureContext::Navigation {
            nav_type,
            url,
            previous_url,
            hash,
            scroll_y,
            previous_scroll_y: None,
            scroll_delta: None,
            state_json,
        };
        let record =
            CaptureRecord::new(Severity::Info, message, context, self.clock.now_ms());
        self.sink.capture(record);
    }

    /// The page pushed a new history entry.
    pub fn push_state(&self, url: impl Into<String>, state_json: Option<String>) {
        let url = url.into();
        let message = format!("NAVIGATION: Pushed state to {}", short_url(&url));
        self.transition(NavType::PushState, url, None, state_json, message);
    }

    /// The page replaced the current history entry.
    pub fn replace_state(&self, url: impl Into<String>, state_json: Option<String>) {
        let url = url.into();
        let message = format!("NAVIGATION: Replaced state with {}", short_url(&url));
        self.transition(NavType::ReplaceState, url, None, state_json, message);
    }

    /// The user navigated back or forward.
    pub fn pop_state(&self, url: impl Into<String>, state_json: Option<String>) {
        let url = url.into();
        let message = format!("NAVIGATION: History traversal to {}", short_url(&url));
        self.transition(NavType::PopState, url, None, state_json, message);
    }

    /// The location hash changed.
    pub fn hash_change(&self, url: impl Into<String>, hash: impl Into<String>) {
        let url = url.into();
        let hash = hash.into();
        let message = format!("NAVIGATION: Hash changed to {hash}");
        self.transition(NavType::HashChange, url, Some(hash), None, message);
    }

    /// The page reported a scroll position. Debounced; see [`Self::tick`].
    pub fn scroll(&self, y: i64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let fire_at = self.clock.now_ms() + SCROLL_DEBOUNCE_MS;
        state.pending_scroll = Some(PendingScroll { target_y: y, fire_at });
    }

    /// Flush a settled scroll window, if any.
    ///
    /// Hosts call this from their timer loop; tests drive it manually.
    pub fn tick(&self) {
        let now = self.clock.now_ms();
        let capture = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let Some(pending) = &state.pending_scroll else {
                return;
            };
            if now < pending.fire_at {
                return;
            }
            let target_y = pending.target_y;
            let previous_y = state.scroll_y;
            state.pending_scroll = None;
            let delta = target_y - previous_y;
            // The baseline only advances on capture, so sub-threshold
            // movement keeps accumulating toward the next one.
            if delta.abs() <= SCROLL_DELTA_THRESHOLD {
                return;
            }
            state.scroll_y = target_y;
            let context = CaptureContext::Navigation {
                nav_type: NavType::Scroll,
                url: state.current_url.clone(),
                previous_url: None,
                hash: None,
                scroll_y: target_y,
                previous_scroll_y: Some(previous_y),
                scroll_delta: Some(delta),
                state_json: None,
            };
            let message = format!("SCROLL: Page scrolled to Y={target_y}");
            CaptureRecord::new(Severity::Debug, message, context, now)
                .with_from(format!("Y={previous_y}"))
                .with_to(format!("Y={target_y}"))
        };
        self.sink.capture(capture);
    }
}

// =============================================================================
// Page errors
// =============================================================================

/// Receives page-level failure callbacks and WB application events.
pub struct PageErrorHook {
    sink: Arc<EventSink>,
    clock: Arc<dyn Clock>,
}

impl PageErrorHook {
    #[must_use]
    pub fn new(sink: Arc<EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// An uncaught exception reached the window.
    pub fn window_error(
        &self,
        message: impl Into<String>,
        filename: impl Into<String>,
        line: u32,
        col: u32,
        stack: Option<String>,
    ) {
        let context = CaptureContext::WindowError {
            filename: filename.into(),
            line,
            col,
            stack,
        };
        let record =
            CaptureRecord::new(Severity::Error, message, context, self.clock.now_ms());
        self.sink.capture(record);
    }

    /// A promise rejected with no handler attached.
    pub fn promise_rejection(&self, reason: impl Into<String>, stack: Option<String>) {
        let reason = reason.into();
        let message = format!("Unhandled Promise Rejection: {reason}");
        let context = CaptureContext::PromiseRejection { reason, stack };
        let record =
            CaptureRecord::new(Severity::Error, message, context, self.clock.now_ms());
        self.sink.capture(record);
    }

    /// A resource element (image, script, stylesheet) failed to load.
    pub fn resource_error(
        &self,
        url: impl Into<String>,
        resource_type: impl Into<String>,
        element_html: Option<String>,
    ) {
        let url = url.into();
        let resource_type = resource_type.into();
        let message = format!("Failed to load {resource_type}: {url}");
        let context = CaptureContext::ResourceError {
            url,
            resource_type,
            element_html,
        };
        let record =
            CaptureRecord::new(Severity::Error, message, context, self.clock.now_ms());
        self.sink.capture(record);
    }

    /// An application component dispatched a WB event (`wb:info`,
    /// `wb:error`, ...).
    pub fn wb_event(
        &self,
        severity: Severity,
        message: impl Into<String>,
        source: Option<String>,
    ) {
        let context = CaptureContext::App { source };
        let record =
            CaptureRecord::new(severity, message, context, self.clock.now_ms());
        self.sink.capture(record);
    }

    /// A component finished loading (`wb:component-loaded`).
    pub fn component_loaded(&self, component: impl Into<String>) {
        let component = component.into();
        let message = format!("Component loaded: {component}");
        self.wb_event(Severity::Success, message, Some(component));
    }

    /// A component failed to load (`wb:component-error`).
    pub fn component_error(&self, component: impl Into<String>, error: impl Into<String>) {
        let component = component.into();
        let message = format!("Component error in {}: {}", component, error.into());
        self.wb_event(Severity::Error, message, Some(component));
    }
}

// =============================================================================
// Tests
// =============================================================================
