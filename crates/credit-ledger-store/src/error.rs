//! Error types for credit ledger storage.

use credit_ledger_core::BillingError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record (`client`, `plan`, `order`, ...).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A business rule rejected the operation. Nothing was written.
    #[error(transparent)]
    Billing(#[from] BillingError),

    /// The transaction did not finish within its deadline and was rolled back.
    #[error("{operation} timed out")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Wrap a driver error with the operation that produced it.
    pub fn database(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Database(format!("{context}: {err}"))
    }
}
