//! Query shapes for browsing listings and transactions.

use serde::{Deserialize, Serialize};

use common::{Money, UserId};

use crate::records::Availability;

/// Field a listing search is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Date,
    Price,
    Name,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter for browsing listings.
///
/// The default filter returns available listings, newest first.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    /// Case-insensitive substring match on the listing name.
    pub search: Option<String>,
    /// Exact category match.
    pub category: Option<String>,
    /// Availability to match; `None` defaults to `available`.
    pub availability: Option<Availability>,
    /// Inclusive lower price bound.
    pub min_price: Option<Money>,
    /// Inclusive upper price bound.
    pub max_price: Option<Money>,
    pub sort_by: SortField,
    pub order: SortOrder,
}

impl ListingFilter {
    /// The availability this filter effectively selects.
    pub fn effective_availability(&self) -> Availability {
        self.availability.unwrap_or(Availability::Available)
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = Some(availability);
        self
    }

    pub fn with_price_range(mut self, min: Option<Money>, max: Option<Money>) -> Self {
        self.min_price = min;
        self.max_price = max;
        self
    }

    pub fn sorted(mut self, sort_by: SortField, order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.order = order;
        self
    }
}

/// Which side of a transaction a user query selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionRole {
    Buyer,
    Seller,
    /// Buyer or seller.
    #[default]
    Either,
}

impl TransactionRole {
    /// Returns true if a transaction with the given parties matches this
    /// role for `user`.
    pub fn matches(&self, user: UserId, buyer: UserId, seller: UserId) -> bool {
        match self {
            TransactionRole::Buyer => buyer == user,
            TransactionRole::Seller => seller == user,
            TransactionRole::Either => buyer == user || seller == user,
        }
    }
}
