//! Error types for modlayer-patch

use thiserror::Error;

/// Patch error type
#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// State store error
    #[error("Store error: {0}")]
    Store(String),

    /// Writer error
    #[error("Writer error: {0}")]
    Writer(String),

    /// Reader error
    #[error("Reader error: {0}")]
    Reader(String),

    /// Requested format is not compiled in
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Hub error
    #[error("Hub error: {0}")]
    Hub(#[from] modlayer_hub::Error),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] modlayer_core::Error),
}

/// Result type for patch operations
pub type Result<T> = std::result::Result<T, Error>;

fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
