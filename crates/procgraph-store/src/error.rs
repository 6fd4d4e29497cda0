//! Error types for storage backends.

use thiserror::Error;

/// Convenience result type using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by [`ProcessStore`](crate::ProcessStore) implementations.
///
/// The runtime treats storage failures as non-fatal (reads behave as if the
/// key were absent, writes as no-ops) but backends must still report them
/// accurately so hosts can upgrade the policy.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The record does not exist.
    ///
    /// Backends may return `Ok(None)` from reads instead; this variant exists
    /// for backends where absence is only discoverable as an error.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A record could not be serialized or deserialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The store has been closed and no further operations are accepted.
    #[error("store is closed")]
    Closed,
}
