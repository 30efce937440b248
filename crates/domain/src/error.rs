//! Domain error taxonomy.

use store::StoreError;
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum MarketError {
    /// The request is malformed or breaks a business rule.
    #[error("{0}")]
    Validation(String),

    /// The actor is not allowed to perform this operation.
    #[error("{0}")]
    Authorization(String),

    /// The referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The operation lost to a concurrent state change or would leave
    /// the system inconsistent.
    #[error("{0}")]
    Conflict(String),

    /// An error occurred in the market store.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for MarketError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ListingUnavailable { .. } => {
                MarketError::Conflict("item unavailable".to_string())
            }
            StoreError::TransactionSettled { .. } => {
                MarketError::Conflict("transaction already settled".to_string())
            }
            StoreError::RowNotFound { entity, id } => {
                MarketError::NotFound(format!("{entity} not found: {id}"))
            }
            StoreError::DuplicateEmail { .. } => {
                MarketError::Validation("email already registered".to_string())
            }
            other => MarketError::Store(other),
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, MarketError>;
