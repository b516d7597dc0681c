//! Store error types.

use cryo_api::ObjectKey;
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    /// The object changed since it was read; re-fetch and retry.
    #[error("{kind} {key} modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        expected: u64,
        found: u64,
    },

    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
