//! Persistence layer for the marketplace.
//!
//! Defines the [`MarketStore`] contract the lifecycle engines run against,
//! the record types it persists, and two interchangeable implementations:
//! an in-memory store for tests and local runs, and a PostgreSQL store for
//! production. All multi-row mutations are exposed as compound operations
//! that commit atomically in both backends.

pub mod error;
pub mod filter;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use common::{ListingId, Money, TransactionId, UserId};
pub use error::{Result, StoreError};
pub use filter::{ListingFilter, SortField, SortOrder, TransactionRole};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use records::{
    AuthTokenRecord, Availability, Condition, ListingRecord, TransactionRecord, TransactionStatus,
    UserRecord,
};
pub use store::MarketStore;
