use async_trait::async_trait;

use common::{ListingId, TransactionId, UserId};

use crate::Result;
use crate::filter::{ListingFilter, TransactionRole};
use crate::records::{
    AuthTokenRecord, Availability, ListingRecord, TransactionRecord, TransactionStatus, UserRecord,
};

/// Persistence contract for the marketplace.
///
/// Row-level operations read or write a single record. The compound
/// operations at the bottom are the consistency-critical surface: each one
/// is a single atomic unit of work, committing all of its writes or none
/// of them, in every implementation. All implementations must be
/// thread-safe (`Send + Sync`).
#[async_trait]
pub trait MarketStore: Send + Sync {
    // --- Users ---

    /// Inserts a new user.
    ///
    /// Fails with `DuplicateEmail` if the email is already registered.
    async fn insert_user(&self, user: &UserRecord) -> Result<()>;

    /// Looks a user up by ID.
    async fn user(&self, id: UserId) -> Result<Option<UserRecord>>;

    /// Looks a user up by email address.
    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Rewrites a user's mutable columns (everything but ID and creation
    /// timestamp). Fails with `RowNotFound` if the user is gone and
    /// `DuplicateEmail` if the new email collides.
    async fn update_user(&self, user: &UserRecord) -> Result<()>;

    // --- Listings ---

    /// Inserts a new listing.
    async fn insert_listing(&self, listing: &ListingRecord) -> Result<()>;

    /// Looks a listing up by ID.
    async fn listing(&self, id: ListingId) -> Result<Option<ListingRecord>>;

    /// Rewrites a listing's owner-editable columns. Availability, owner,
    /// and creation timestamp are NOT written: availability belongs to the
    /// transaction lifecycle and may change concurrently with an edit.
    async fn update_listing(&self, listing: &ListingRecord) -> Result<()>;

    /// Deletes a listing row.
    async fn delete_listing(&self, id: ListingId) -> Result<()>;

    /// Returns listings matching the filter, fully ordered per its sort.
    async fn find_listings(&self, filter: &ListingFilter) -> Result<Vec<ListingRecord>>;

    /// Returns a user's own listings, newest first. `None` availability
    /// means all of them, sold included.
    async fn listings_by_owner(
        &self,
        owner: UserId,
        availability: Option<Availability>,
    ) -> Result<Vec<ListingRecord>>;

    // --- Transactions ---

    /// Looks a transaction up by ID.
    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRecord>>;

    /// Returns transactions where the user plays the given role, newest
    /// first.
    async fn transactions_for_user(
        &self,
        user: UserId,
        role: TransactionRole,
    ) -> Result<Vec<TransactionRecord>>;

    /// Returns the pending transaction referencing a listing, if any.
    /// At most one can exist at a time.
    async fn pending_transaction_for_listing(
        &self,
        listing: ListingId,
    ) -> Result<Option<TransactionRecord>>;

    // --- Auth tokens ---

    /// Persists a bearer token, sweeping rows whose expiry has passed so
    /// the token table does not grow without bound.
    async fn insert_token(&self, token: &AuthTokenRecord) -> Result<()>;

    /// Looks a bearer token up.
    async fn token(&self, token: &str) -> Result<Option<AuthTokenRecord>>;

    /// Revokes a bearer token. Revoking an unknown token is a no-op.
    async fn delete_token(&self, token: &str) -> Result<()>;

    // --- Atomic units of work ---

    /// Records a purchase: flips the listing `available -> sold` and
    /// inserts the pending transaction, atomically.
    ///
    /// The availability flip is conditional on the listing still being
    /// `available` at write time, closing the gap between the caller's
    /// availability check and this commit. When two purchases race on one
    /// listing, exactly one commits; the loser fails with
    /// `ListingUnavailable` and writes nothing.
    async fn create_purchase(&self, transaction: &TransactionRecord) -> Result<()>;

    /// Updates a transaction's status and, when requested, the referenced
    /// listing's availability in the same unit of work.
    ///
    /// The status write is conditional on the transaction still being
    /// `pending`, closing the gap between the caller's status check and
    /// this commit: a write that races against a completed or cancelled
    /// transaction fails with `TransactionSettled` and writes nothing.
    /// A missing listing is tolerated (it may have been deleted after the
    /// sale); a missing transaction fails with `RowNotFound`.
    async fn set_transaction_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        listing_availability: Option<(ListingId, Availability)>,
    ) -> Result<()>;

    /// Deletes a transaction. Unless it had completed, the referenced
    /// listing reverts to `available` in the same unit of work; the
    /// decision reads the row being deleted, never a stale copy. Tolerates
    /// the listing having been deleted.
    async fn delete_transaction(&self, id: TransactionId) -> Result<()>;

    /// Removes every trace of a user in one unit of work: their listings,
    /// every transaction where they are buyer or seller, their bearer
    /// tokens, and the user row itself. Any failure rolls the whole purge
    /// back; no partial purge is ever observable.
    async fn purge_user(&self, user: UserId) -> Result<()>;
}
