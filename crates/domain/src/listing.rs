//! Listing lifecycle engine.

use chrono::Utc;
use serde::Deserialize;

use common::{ListingId, Money, UserId};
use store::{Availability, Condition, ListingFilter, ListingRecord, MarketStore};

use crate::error::{MarketError, Result};
use crate::patch::double_option;

/// Input for creating a listing.
#[derive(Debug, Clone, Deserialize)]
pub struct NewListing {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Money,
    pub condition: Option<Condition>,
    pub location: Option<String>,
    pub image_ref: Option<String>,
}

/// Partial update for a listing.
///
/// Outer `None` means "leave the field alone"; nullable columns use a
/// second `Option` so an explicit `null` clears them. Availability is
/// deliberately absent: it is owned by the transaction lifecycle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category: Option<Option<String>>,
    pub price: Option<Money>,
    #[serde(default, deserialize_with = "double_option")]
    pub condition: Option<Option<Condition>>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub image_ref: Option<Option<String>>,
}

/// Service for managing listings.
pub struct ListingService<S> {
    store: S,
}

impl<S: MarketStore> ListingService<S> {
    /// Creates a new listing service backed by the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates a listing owned by `owner`. New listings are `available`.
    #[tracing::instrument(skip(self, new))]
    pub async fn create(&self, owner: UserId, new: NewListing) -> Result<ListingRecord> {
        validate_name(&new.name)?;
        validate_price(new.price)?;

        let record = ListingRecord {
            id: ListingId::new(),
            owner_id: owner,
            name: new.name.trim().to_string(),
            description: new.description,
            category: new.category,
            price: new.price,
            condition: new.condition,
            location: new.location,
            image_ref: new.image_ref,
            availability: Availability::Available,
            created_at: Utc::now(),
        };
        self.store.insert_listing(&record).await?;
        Ok(record)
    }

    /// Applies a partial update. Owner only.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(
        &self,
        listing_id: ListingId,
        actor: UserId,
        patch: ListingPatch,
    ) -> Result<ListingRecord> {
        let mut listing = self.get(listing_id).await?;
        if listing.owner_id != actor {
            return Err(MarketError::Authorization(
                "only the owner can edit a listing".to_string(),
            ));
        }

        if let Some(name) = patch.name {
            validate_name(&name)?;
            listing.name = name.trim().to_string();
        }
        if let Some(price) = patch.price {
            validate_price(price)?;
            listing.price = price;
        }
        if let Some(description) = patch.description {
            listing.description = description;
        }
        if let Some(category) = patch.category {
            listing.category = category;
        }
        if let Some(condition) = patch.condition {
            listing.condition = condition;
        }
        if let Some(location) = patch.location {
            listing.location = location;
        }
        if let Some(image_ref) = patch.image_ref {
            listing.image_ref = image_ref;
        }

        self.store.update_listing(&listing).await?;
        Ok(listing)
    }

    /// Deletes a listing. Owner only; refused while a pending transaction
    /// references it, so live purchases are never orphaned.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, listing_id: ListingId, actor: UserId) -> Result<()> {
        let listing = self.get(listing_id).await?;
        if listing.owner_id != actor {
            return Err(MarketError::Authorization(
                "only the owner can delete a listing".to_string(),
            ));
        }
        if self
            .store
            .pending_transaction_for_listing(listing_id)
            .await?
            .is_some()
        {
            return Err(MarketError::Conflict(
                "listing has a pending transaction".to_string(),
            ));
        }
        self.store.delete_listing(listing_id).await?;
        Ok(())
    }

    /// Public detail lookup.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, listing_id: ListingId) -> Result<ListingRecord> {
        self.store
            .listing(listing_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing not found: {listing_id}")))
    }

    /// Public browse over the listing catalogue.
    #[tracing::instrument(skip(self, filter))]
    pub async fn list(&self, filter: &ListingFilter) -> Result<Vec<ListingRecord>> {
        Ok(self.store.find_listings(filter).await?)
    }

    /// A user's own listings, sold ones included unless filtered.
    #[tracing::instrument(skip(self))]
    pub async fn list_owned(
        &self,
        owner: UserId,
        availability: Option<Availability>,
    ) -> Result<Vec<ListingRecord>> {
        Ok(self.store.listings_by_owner(owner, availability).await?)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MarketError::Validation("name is required".to_string()));
    }
    Ok(())
}

fn validate_price(price: Money) -> Result<()> {
    if price.is_negative() {
        return Err(MarketError::Validation(
            "price must not be negative".to_string(),
        ));
    }
    Ok(())
}
