//! Error types for Monetus Sync Core.

use thiserror::Error;

/// Errors raised while validating or merging snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The remote payload is missing a required collection or a record is malformed.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// A snapshot could not be encoded to its wire form.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
