//! Identity store error types.

use thiserror::Error;

/// Errors returned by [`crate::IdentityStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A create violated a uniqueness constraint.
    ///
    /// Callers performing get-or-create treat this as "already exists" and
    /// re-fetch; it is not a fatal condition.
    #[error("duplicate value for unique field '{field}'")]
    Duplicate { field: &'static str },

    /// The referenced record does not exist.
    #[error("record not found")]
    NotFound,

    /// The backing store failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
