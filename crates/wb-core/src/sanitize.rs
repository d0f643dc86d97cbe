//! Context sanitization — bounds every stored string before it reaches the
//! buffer or the key/value store.
//!
//! All truncation here is idempotent: running a sanitizer over already
//! sanitized input produces byte-identical output. The sink relies on that
//! when entries round-trip through persistence.

use crate::capture::CaptureContext;
use std::collections::BTreeMap;

/// Maximum stored message length, in characters.
pub const MAX_MESSAGE_LEN: usize = 200;
/// Maximum stored stack-trace length.
pub const MAX_STACK_LEN: usize = 500;
/// Maximum stored code-snippet length.
pub const MAX_CODE_LEN: usize = 300;
/// Header maps whose serialized size exceeds this are redacted wholesale.
pub const MAX_HEADERS_BYTES: usize = 200;

const ELLIPSIS: &str = "...";
const TRUNCATED_SUFFIX: &str = "...\n(truncated)";
const REDACTED_HEADERS_KEY: &str = "_truncated";
const REDACTED_HEADERS_NOTE: &str = "Headers too large, removed for storage";

/// Truncate a message to [`MAX_MESSAGE_LEN`] characters plus an ellipsis.
///
/// Returns the bounded message and, when truncation happened, the original.
#[must_use]
pub fn truncate_message(message: &str) -> (String, Option<String>) {
    let len = message.chars().count();
    let already_bounded =
        len <= MAX_MESSAGE_LEN || (len == MAX_MESSAGE_LEN + ELLIPSIS.len() && message.ends_with(ELLIPSIS));
    if already_bounded {
        return (message.to_string(), None);
    }
    let mut truncated: String = message.chars().take(MAX_MESSAGE_LEN).collect();
    truncated.push_str(ELLIPSIS);
    (truncated, Some(message.to_string()))
}

fn truncate_block(text: &str, max_len: usize) -> String {
    let len = text.chars().count();
    let already_bounded = len <= max_len
        || (len == max_len + TRUNCATED_SUFFIX.chars().count() && text.ends_with(TRUNCATED_SUFFIX));
    if already_bounded {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_len).collect();
    truncated.push_str(TRUNCATED_SUFFIX);
    truncated
}

fn redact_oversized_headers(headers: &mut BTreeMap<String, String>) {
    if headers.is_empty() || headers.contains_key(REDACTED_HEADERS_KEY) {
        return;
    }
    let serialized = serde_json::to_string(headers).map_or(usize::MAX, |s| s.len());
    if serialized > MAX_HEADERS_BYTES {
        headers.clear();
        headers.insert(
            REDACTED_HEADERS_KEY.to_string(),
            REDACTED_HEADERS_NOTE.to_string(),
        );
    }
}

/// Sanitize a capture context in place.
///
/// Strips DOM element references, truncates stack/code text, and redacts
/// oversized header maps.
pub fn sanitize_context(context: &mut CaptureContext) {
    match context {
        CaptureContext::Http {
            headers,
            request_headers,
            stack_trace,
            code,
            ..
        } => {
            if let Some(stack) = stack_trace {
                *stack = truncate_block(stack, MAX_STACK_LEN);
            }
            if let Some(snippet) = code {
                *snippet = truncate_block(snippet, MAX_CODE_LEN);
            }
            redact_oversized_headers(headers);
            redact_oversized_headers(request_headers);
        }
        CaptureContext::WindowError { stack, .. }
        | CaptureContext::PromiseRejection { stack, .. } => {
            if let Some(text) = stack {
                *text = truncate_block(text, MAX_STACK_LEN);
            }
        }
        CaptureContext::ResourceError { element_html, .. } => {
            // Raw DOM text never reaches storage.
            *element_html = None;
        }
        CaptureContext::Console | CaptureContext::Navigation { .. } | CaptureContext::App { .. } => {}
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureContext;

    fn http_context(stack: Option<&str>, code: Option<&str>) -> CaptureContext {
        CaptureContext::Http {
            url: "/api/items".to_string(),
            method: "GET".to_string(),
            status: Some(404),
            status_text: Some("Not Found".to_string()),
            duration_ms: 12,
            headers: BTreeMap::new(),
            request_headers: BTreeMap::new(),
            stack_trace: stack.map(str::to_string),
            code: code.map(str::to_string),
            error: None,
        }
    }

    // -- Message truncation -----------------------------------------------------

    #[test]
    fn short_message_unchanged() {
        let (message, original) = truncate_message("hello");
        assert_eq!(message, "hello");
        assert!(original.is_none());
    }

    #[test]
    fn long_message_truncated_with_original_kept() {
        let long = "x".repeat(500);
        let (message, original) = truncate_message(&long);
        assert_eq!(message.chars().count(), MAX_MESSAGE_LEN + ELLIPSIS.len());
        assert!(message.ends_with(ELLIPSIS));
        assert_eq!(original.as_deref(), Some(long.as_str()));
    }

    #[test]
    fn message_truncation_is_idempotent() {
        let long = "y".repeat(400);
        let (once, _) = truncate_message(&long);
        let (twice, original) = truncate_message(&once);
        assert_eq!(once, twice);
        assert!(original.is_none());
    }

    #[test]
    fn boundary_message_not_truncated() {
        let exact = "z".repeat(MAX_MESSAGE_LEN);
        let (message, original) = truncate_message(&exact);
        assert_eq!(message, exact);
        assert!(original.is_none());
    }

    // -- Stack and code truncation ----------------------------------------------

    #[test]
    fn stack_truncated_at_limit() {
        let mut ctx = http_context(Some(&"s".repeat(900)), None);
        sanitize_context(&mut ctx);
        let CaptureContext::Http { stack_trace, .. } = &ctx else {
            panic!("expected http context");
        };
        let stack = stack_trace.as_deref().unwrap();
        assert!(stack.ends_with("(truncated)"));
        assert_eq!(
            stack.chars().count(),
            MAX_STACK_LEN + TRUNCATED_SUFFIX.chars().count()
        );
    }

    #[test]
    fn code_truncated_at_limit() {
        let mut ctx = http_context(None, Some(&"c".repeat(600)));
        sanitize_context(&mut ctx);
        let CaptureContext::Http { code, .. } = &ctx else {
            panic!("expected http context");
        };
        assert!(code.as_deref().unwrap().ends_with("(truncated)"));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let mut ctx = http_context(Some(&"s".repeat(900)), Some(&"c".repeat(600)));
        sanitize_context(&mut ctx);
        let after_once = ctx.clone();
        sanitize_context(&mut ctx);
        assert_eq!(ctx, after_once);
    }

    // -- Header redaction -------------------------------------------------------

    #[test]
    fn oversized_headers_redacted() {
        let mut headers = BTreeMap::new();
        for i in 0..20 {
            headers.insert(format!("x-header-{i}"), "a-long-header-value".to_string());
        }
        let mut ctx = CaptureContext::Http {
            url: "/x".to_string(),
            method: "GET".to_string(),
            status: Some(500),
            status_text: None,
            duration_ms: 1,
            headers,
            request_headers: BTreeMap::new(),
            stack_trace: None,
            code: None,
            error: None,
        };
        sanitize_context(&mut ctx);
        let CaptureContext::Http { headers, .. } = &ctx else {
            panic!("expected http context");
        };
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(REDACTED_HEADERS_KEY));
        // Second pass leaves the redaction marker alone.
        let snapshot = ctx.clone();
        sanitize_context(&mut ctx);
        assert_eq!(ctx, snapshot);
    }

    #[test]
    fn small_headers_kept() {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "text/html".to_string());
        let mut ctx = CaptureContext::Http {
            url: "/x".to_string(),
            method: "GET".to_string(),
            status: Some(404),
            status_text: None,
            duration_ms: 1,
            headers,
            request_headers: BTreeMap::new(),
            stack_trace: None,
            code: None,
            error: None,
        };
        sanitize_context(&mut ctx);
        let CaptureContext::Http { headers, .. } = &ctx else {
            panic!("expected http context");
        };
        assert_eq!(headers.get("accept").map(String::as_str), Some("text/html"));
    }

    // -- DOM stripping ----------------------------------------------------------

    #[test]
    fn element_html_is_dropped() {
        let mut ctx = CaptureContext::ResourceError {
            url: "/img/logo.png".to_string(),
            resource_type: "img".to_string(),
            element_html: Some("<img src=\"/img/logo.png\">".to_string()),
        };
        sanitize_context(&mut ctx);
        let CaptureContext::ResourceError { element_html, .. } = &ctx else {
            panic!("expected resource context");
        };
        assert!(element_html.is_none());
    }
}
