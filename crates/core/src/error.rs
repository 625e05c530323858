//! Error types for postmirror
//!
//! This module defines the error type shared by the store, the hole registry
//! and the backfill engine. We use `thiserror` for automatic `Display` and
//! `Error` trait implementations.

use thiserror::Error;

use crate::key::OrderedKey;

/// Result type alias for postmirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for postmirror
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A persisted record could not be interpreted
    #[error("Data corruption at key {key}: {reason}")]
    Corruption {
        /// Key of the offending record
        key: OrderedKey,
        /// What was wrong with it
        reason: String,
    },

    /// A structural invariant was about to be broken (programming error)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A fill direction that cannot be served for this hole
    #[error("Unsupported fill direction: {0}")]
    UnsupportedDirection(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Build a corruption error for `key`
    pub fn corruption(key: &OrderedKey, reason: impl Into<String>) -> Self {
        Error::Corruption {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Whether this error reports a broken invariant
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
