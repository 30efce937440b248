//! Lifecycle engines for the marketplace.
//!
//! Three services own the business rules: [`ListingService`] for the
//! catalogue, [`TransactionService`] for the purchase lifecycle, and
//! [`AccountService`] for identity and the account purge. All of them are
//! generic over the [`store::MarketStore`] backend.

pub mod account;
pub mod credential;
pub mod error;
pub mod listing;
mod patch;
pub mod transaction;

pub use account::{AccountService, AuthSession, NewUser, PasswordChange, ProfilePatch};
pub use error::{MarketError, Result};
pub use listing::{ListingPatch, ListingService, NewListing};
pub use transaction::{PurchaseRequest, TransactionService};
