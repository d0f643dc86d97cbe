//! wb-core: Diagnostics core for the WB component family
//!
//! This crate provides the capture pipeline behind the `wb-event-log` and
//! `wb-status` components: interceptors over the page's observable surfaces,
//! a bounded newest-first event sink, a storage quota guard, and a transient
//! status toast queue.
//!
//! # Architecture
//!
//! ```text
//! Console / HTTP / Navigation / Page errors
//!                 ↓ (interceptor decorators)
//!            Event Sink → Notice Hub → Presentation / Status Bar
//!                 ↓
//!           Storage Guard (quota probe + two-phase eviction)
//! ```
//!
//! # Modules
//!
//! - `capture`: Capture records, severities, and kind-specific contexts
//! - `sink`: Bounded newest-first event buffer with reentrancy protection
//! - `interceptor`: Decorators over console, HTTP transport, navigation,
//!   and page-error surfaces
//! - `sanitize`: Truncation and redaction applied before storage
//! - `storage_guard`: Key/value quota probe and two-phase eviction
//! - `status`: Transient toast queue with pacing and dedup
//! - `notices`: Typed notification bus replacing DOM `CustomEvent`s
//! - `config`: File and attribute-level configuration
//! - `entry_id`: Process-unique entry identifiers
//! - `clock`: Injectable millisecond clock
//! - `logging`: Structured logging setup for the pipeline's own diagnostics
//! - `error`: Error types
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod capture;
pub mod clock;
pub mod config;
pub mod entry_id;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod notices;
pub mod sanitize;
pub mod sink;
pub mod status;
pub mod storage_guard;

pub use capture::{CaptureContext, CaptureKind, CaptureRecord, Severity};
pub use config::{EventLogConfig, StatusOptions};
pub use error::{ConfigError, Error, Result, StorageError};
pub use notices::{Listener, Notice};
pub use sink::{EventSink, LogEntry};
pub use status::StatusBar;
pub use storage_guard::{KeyValueStore, MemoryStore, StorageGuard};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
