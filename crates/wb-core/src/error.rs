//! Error types for wb-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wb-core
#[derive(Error, Debug)]
pub enum Error {
    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Event pipeline errors (sanitization, listener dispatch, etc.)
    #[error("Sink error: {0}")]
    Sink(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key/value storage errors
///
/// The browser original surfaces these as `QuotaExceededError` DOM
/// exceptions; here they are explicit variants so the eviction policy is
/// testable without a real storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A write would exceed the store's byte quota
    #[error("Quota exceeded writing key '{key}' ({needed} bytes needed)")]
    QuotaExceeded {
        /// Key whose write failed
        key: String,
        /// Bytes the write would have required
        needed: usize,
    },

    /// Key does not exist
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Backend failure (enumeration failed, store unavailable, etc.)
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether this error indicates quota exhaustion.
    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// TOML parse failure
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A field holds an out-of-range or malformed value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Config field name
        field: String,
        /// Why the value was rejected
        reason: String,
    },
}
