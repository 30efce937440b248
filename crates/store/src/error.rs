use thiserror::Error;

use common::{ListingId, TransactionId};

/// Errors that can occur when interacting with the market store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A purchase lost the race for a listing: it was already `sold`
    /// (or removed) when the conditional availability update ran.
    #[error("listing {listing_id} is no longer available")]
    ListingUnavailable { listing_id: ListingId },

    /// A status write lost the race for a transaction: it had already
    /// reached a terminal status when the conditional update ran.
    #[error("transaction {transaction_id} is already settled")]
    TransactionSettled { transaction_id: TransactionId },

    /// The referenced row does not exist.
    #[error("{entity} not found: {id}")]
    RowNotFound { entity: &'static str, id: String },

    /// The email address is already registered to another account.
    #[error("email already registered: {email}")]
    DuplicateEmail { email: String },

    /// A stored column holds a value the store cannot interpret.
    #[error("invalid value in column {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
