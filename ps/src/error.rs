//! Store error types

use std::path::PathBuf;
use thiserror::Error;

use crate::profile::ProfileStatus;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for profile {profile_id}: {from} -> {to}")]
    InvalidTransition {
        profile_id: String,
        from: ProfileStatus,
        to: ProfileStatus,
    },

    #[error("Limit exceeded for window '{window}': {count}/{cap}")]
    LimitExceeded { window: String, count: u32, cap: u32 },

    #[error("Run session not found: {0}")]
    SessionNotFound(String),

    #[error("Store at {0} is locked by another run")]
    Locked(PathBuf),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Check if this error reports a broken store contract rather than an I/O problem
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_)
                | StoreError::InvalidTransition { .. }
                | StoreError::LimitExceeded { .. }
                | StoreError::SessionNotFound(_)
        )
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
