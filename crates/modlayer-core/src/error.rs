//! Error types for modlayer-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid definition {key}: {reason}")]
    InvalidDefinition { key: String, reason: String },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
