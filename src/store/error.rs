//! Store Errors
//!
//! Error types for persistence operations.

use uuid::Uuid;

use crate::aggregate::InvoiceStatus;

/// Errors that can occur in a store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict
    #[error("Concurrency conflict for {entity} {id}: expected version {expected}, found {actual}")]
    Conflict {
        entity: &'static str,
        id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// Event not allowed from the stored status
    #[error("{event} is not allowed for invoice {id} in status {status}")]
    InvalidTransition {
        id: Uuid,
        event: &'static str,
        status: InvoiceStatus,
    },

    /// Entity expected to exist is missing
    #[error("{entity} not found: {id}")]
    MissingEntity { entity: &'static str, id: Uuid },

    /// Entity with this id already exists
    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: Uuid },

    /// Stored data could not be turned back into a domain value
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::InvalidTransition { .. }
        )
    }
}

/// Store-wide Result type
pub type StoreResult<T> = Result<T, StoreError>;
