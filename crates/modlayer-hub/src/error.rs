//! Error types for modlayer-hub

use thiserror::Error;

/// Result type for modlayer-hub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in modlayer-hub
#[derive(Debug, Error)]
pub enum Error {
    /// Engine configuration could not be parsed or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// An ignore rule is not a valid wildcard pattern
    #[error("invalid ignore rule {pattern:?}: {reason}")]
    InvalidIgnoreRule { pattern: String, reason: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error
    #[error("core error: {0}")]
    Core(#[from] modlayer_core::Error),
}

// Compile-time check that Error is Send + Sync for thread-safe error propagation.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
