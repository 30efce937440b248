use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use common::{ListingId, TransactionId, UserId};

use crate::error::{Result, StoreError};
use crate::filter::{ListingFilter, SortField, SortOrder, TransactionRole};
use crate::records::{
    AuthTokenRecord, Availability, ListingRecord, TransactionRecord, TransactionStatus, UserRecord,
};
use crate::store::MarketStore;

/// In-memory market store for tests and local runs.
///
/// A single `RwLock` over all tables makes every compound operation
/// naturally atomic: the write guard spans the availability check and the
/// mutations, so concurrent purchases on one listing serialize and exactly
/// one wins.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, UserRecord>,
    listings: HashMap<ListingId, ListingRecord>,
    transactions: HashMap<TransactionId, TransactionRecord>,
    tokens: HashMap<String, AuthTokenRecord>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_listings(listings: &mut [ListingRecord], sort_by: SortField, order: SortOrder) {
    listings.sort_by(|a, b| {
        let ordering = match sort_by {
            SortField::Date => a.created_at.cmp(&b.created_at),
            SortField::Price => a.price.cmp(&b.price),
            SortField::Name => a.name.cmp(&b.name),
        };
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

#[async_trait]
impl MarketStore for InMemoryStore {
    async fn insert_user(&self, user: &UserRecord) -> Result<()> {
        let mut tables = self.inner.write().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail {
                email: user.email.clone(),
            });
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user(&self, id: UserId) -> Result<Option<UserRecord>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let tables = self.inner.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(&self, user: &UserRecord) -> Result<()> {
        let mut tables = self.inner.write().await;
        if tables
            .users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(StoreError::DuplicateEmail {
                email: user.email.clone(),
            });
        }
        match tables.users.get_mut(&user.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = user.clone();
                existing.created_at = created_at;
                Ok(())
            }
            None => Err(StoreError::RowNotFound {
                entity: "user",
                id: user.id.to_string(),
            }),
        }
    }

    async fn insert_listing(&self, listing: &ListingRecord) -> Result<()> {
        let mut tables = self.inner.write().await;
        tables.listings.insert(listing.id, listing.clone());
        Ok(())
    }

    async fn listing(&self, id: ListingId) -> Result<Option<ListingRecord>> {
        Ok(self.inner.read().await.listings.get(&id).cloned())
    }

    async fn update_listing(&self, listing: &ListingRecord) -> Result<()> {
        let mut tables = self.inner.write().await;
        match tables.listings.get_mut(&listing.id) {
            Some(existing) => {
                existing.name = listing.name.clone();
                existing.description = listing.description.clone();
                existing.category = listing.category.clone();
                existing.price = listing.price;
                existing.condition = listing.condition;
                existing.location = listing.location.clone();
                existing.image_ref = listing.image_ref.clone();
                Ok(())
            }
            None => Err(StoreError::RowNotFound {
                entity: "listing",
                id: listing.id.to_string(),
            }),
        }
    }

    async fn delete_listing(&self, id: ListingId) -> Result<()> {
        let mut tables = self.inner.write().await;
        match tables.listings.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::RowNotFound {
                entity: "listing",
                id: id.to_string(),
            }),
        }
    }

    async fn find_listings(&self, filter: &ListingFilter) -> Result<Vec<ListingRecord>> {
        let tables = self.inner.read().await;
        let availability = filter.effective_availability();
        let search = filter.search.as_ref().map(|s| s.to_lowercase());

        let mut matches: Vec<ListingRecord> = tables
            .listings
            .values()
            .filter(|l| l.availability == availability)
            .filter(|l| match &search {
                Some(needle) => l.name.to_lowercase().contains(needle),
                None => true,
            })
            .filter(|l| match &filter.category {
                Some(category) => l.category.as_deref() == Some(category.as_str()),
                None => true,
            })
            .filter(|l| filter.min_price.is_none_or(|min| l.price >= min))
            .filter(|l| filter.max_price.is_none_or(|max| l.price <= max))
            .cloned()
            .collect();

        sort_listings(&mut matches, filter.sort_by, filter.order);
        Ok(matches)
    }

    async fn listings_by_owner(
        &self,
        owner: UserId,
        availability: Option<Availability>,
    ) -> Result<Vec<ListingRecord>> {
        let tables = self.inner.read().await;
        let mut matches: Vec<ListingRecord> = tables
            .listings
            .values()
            .filter(|l| l.owner_id == owner)
            .filter(|l| availability.is_none_or(|a| l.availability == a))
            .cloned()
            .collect();
        sort_listings(&mut matches, SortField::Date, SortOrder::Desc);
        Ok(matches)
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRecord>> {
        Ok(self.inner.read().await.transactions.get(&id).cloned())
    }

    async fn transactions_for_user(
        &self,
        user: UserId,
        role: TransactionRole,
    ) -> Result<Vec<TransactionRecord>> {
        let tables = self.inner.read().await;
        let mut matches: Vec<TransactionRecord> = tables
            .transactions
            .values()
            .filter(|t| role.matches(user, t.buyer_id, t.seller_id))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn pending_transaction_for_listing(
        &self,
        listing: ListingId,
    ) -> Result<Option<TransactionRecord>> {
        let tables = self.inner.read().await;
        Ok(tables
            .transactions
            .values()
            .find(|t| t.listing_id == listing && t.status == TransactionStatus::Pending)
            .cloned())
    }

    async fn insert_token(&self, token: &AuthTokenRecord) -> Result<()> {
        let mut tables = self.inner.write().await;
        let now = Utc::now();
        tables.tokens.retain(|_, t| !t.is_expired(now));
        tables.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn token(&self, token: &str) -> Result<Option<AuthTokenRecord>> {
        Ok(self.inner.read().await.tokens.get(token).cloned())
    }

    async fn delete_token(&self, token: &str) -> Result<()> {
        self.inner.write().await.tokens.remove(token);
        Ok(())
    }

    async fn create_purchase(&self, transaction: &TransactionRecord) -> Result<()> {
        let mut tables = self.inner.write().await;

        // Conditional flip under the write guard; this is the in-memory
        // equivalent of the guarded UPDATE in the PostgreSQL store.
        let listing =
            tables
                .listings
                .get_mut(&transaction.listing_id)
                .ok_or(StoreError::RowNotFound {
                    entity: "listing",
                    id: transaction.listing_id.to_string(),
                })?;
        if listing.availability != Availability::Available {
            return Err(StoreError::ListingUnavailable {
                listing_id: transaction.listing_id,
            });
        }
        listing.availability = Availability::Sold;
        tables
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn set_transaction_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        listing_availability: Option<(ListingId, Availability)>,
    ) -> Result<()> {
        let mut tables = self.inner.write().await;
        let record = tables
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::RowNotFound {
                entity: "transaction",
                id: id.to_string(),
            })?;
        // Settled transactions are final; a racing stale caller fails
        // here under the same write guard.
        if record.status != TransactionStatus::Pending {
            return Err(StoreError::TransactionSettled { transaction_id: id });
        }
        record.status = status;

        if let Some((listing_id, availability)) = listing_availability
            && let Some(listing) = tables.listings.get_mut(&listing_id)
        {
            listing.availability = availability;
        }
        Ok(())
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<()> {
        let mut tables = self.inner.write().await;
        let Some(removed) = tables.transactions.remove(&id) else {
            return Err(StoreError::RowNotFound {
                entity: "transaction",
                id: id.to_string(),
            });
        };
        if removed.status != TransactionStatus::Completed
            && let Some(listing) = tables.listings.get_mut(&removed.listing_id)
        {
            listing.availability = Availability::Available;
        }
        Ok(())
    }

    async fn purge_user(&self, user: UserId) -> Result<()> {
        let mut tables = self.inner.write().await;
        if !tables.users.contains_key(&user) {
            return Err(StoreError::RowNotFound {
                entity: "user",
                id: user.to_string(),
            });
        }
        tables.listings.retain(|_, l| l.owner_id != user);
        tables
            .transactions
            .retain(|_, t| t.buyer_id != user && t.seller_id != user);
        tables.tokens.retain(|_, t| t.user_id != user);
        tables.users.remove(&user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use common::Money;

    fn user(name: &str, email: &str) -> UserRecord {
        UserRecord {
            id: UserId::new(),
            name: name.to_string(),
            email: email.to_string(),
            credential_hash: "hash".to_string(),
            phone: None,
            address: None,
            avatar_ref: None,
            created_at: Utc::now(),
        }
    }

    fn listing(owner: UserId, name: &str, price: i64) -> ListingRecord {
        ListingRecord {
            id: ListingId::new(),
            owner_id: owner,
            name: name.to_string(),
            description: None,
            category: Some("electronics".to_string()),
            price: Money::from_minor(price),
            condition: None,
            location: None,
            image_ref: None,
            availability: Availability::Available,
            created_at: Utc::now(),
        }
    }

    fn purchase_of(listing: &ListingRecord, buyer: UserId) -> TransactionRecord {
        TransactionRecord {
            id: TransactionId::new(),
            listing_id: listing.id,
            buyer_id: buyer,
            seller_id: listing.owner_id,
            quantity: 1,
            total_price: listing.price,
            status: TransactionStatus::Pending,
            payment_method: "cash".to_string(),
            shipping_address: "somewhere".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let store = InMemoryStore::new();
        store.insert_user(&user("A", "a@example.com")).await.unwrap();
        let result = store.insert_user(&user("B", "a@example.com")).await;
        assert!(matches!(result, Err(StoreError::DuplicateEmail { .. })));
    }

    #[tokio::test]
    async fn purchase_flips_availability_and_inserts_transaction() {
        let store = InMemoryStore::new();
        let seller = user("S", "s@example.com");
        let buyer = user("B", "b@example.com");
        store.insert_user(&seller).await.unwrap();
        store.insert_user(&buyer).await.unwrap();

        let item = listing(seller.id, "Laptop", 3_500_000);
        store.insert_listing(&item).await.unwrap();

        let tx = purchase_of(&item, buyer.id);
        store.create_purchase(&tx).await.unwrap();

        let stored = store.listing(item.id).await.unwrap().unwrap();
        assert_eq!(stored.availability, Availability::Sold);
        assert!(store.transaction(tx.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_purchase_on_same_listing_conflicts() {
        let store = InMemoryStore::new();
        let seller = user("S", "s@example.com");
        store.insert_user(&seller).await.unwrap();
        let item = listing(seller.id, "Laptop", 100);
        store.insert_listing(&item).await.unwrap();

        store
            .create_purchase(&purchase_of(&item, UserId::new()))
            .await
            .unwrap();
        let result = store
            .create_purchase(&purchase_of(&item, UserId::new()))
            .await;

        assert!(matches!(
            result,
            Err(StoreError::ListingUnavailable { .. })
        ));
        // Losing attempt wrote nothing: still exactly one transaction.
        let sales = store
            .transactions_for_user(seller.id, TransactionRole::Seller)
            .await
            .unwrap();
        assert_eq!(sales.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_purchases_exactly_one_wins() {
        let store = InMemoryStore::new();
        let seller = user("S", "s@example.com");
        store.insert_user(&seller).await.unwrap();
        let item = listing(seller.id, "Laptop", 100);
        store.insert_listing(&item).await.unwrap();

        let a = purchase_of(&item, UserId::new());
        let b = purchase_of(&item, UserId::new());

        let store_a = store.clone();
        let store_b = store.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { store_a.create_purchase(&a).await }),
            tokio::spawn(async move { store_b.create_purchase(&b).await }),
        );
        let results = [ra.unwrap(), rb.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(StoreError::ListingUnavailable { .. })
        )));
    }

    #[tokio::test]
    async fn cancel_reverts_availability() {
        let store = InMemoryStore::new();
        let seller = user("S", "s@example.com");
        store.insert_user(&seller).await.unwrap();
        let item = listing(seller.id, "Laptop", 100);
        store.insert_listing(&item).await.unwrap();
        let tx = purchase_of(&item, UserId::new());
        store.create_purchase(&tx).await.unwrap();

        store
            .set_transaction_status(
                tx.id,
                TransactionStatus::Cancelled,
                Some((item.id, Availability::Available)),
            )
            .await
            .unwrap();

        let stored = store.listing(item.id).await.unwrap().unwrap();
        assert_eq!(stored.availability, Availability::Available);
        let stored_tx = store.transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored_tx.status, TransactionStatus::Cancelled);
    }

    #[tokio::test]
    async fn delete_transaction_reverts_unless_completed() {
        let store = InMemoryStore::new();
        let seller = user("S", "s@example.com");
        store.insert_user(&seller).await.unwrap();
        let item = listing(seller.id, "Laptop", 100);
        store.insert_listing(&item).await.unwrap();

        // Pending delete puts the listing back.
        let tx = purchase_of(&item, UserId::new());
        store.create_purchase(&tx).await.unwrap();
        store.delete_transaction(tx.id).await.unwrap();
        assert!(store.transaction(tx.id).await.unwrap().is_none());
        let stored = store.listing(item.id).await.unwrap().unwrap();
        assert_eq!(stored.availability, Availability::Available);

        // Completed delete leaves it sold.
        let tx = purchase_of(&item, UserId::new());
        store.create_purchase(&tx).await.unwrap();
        store
            .set_transaction_status(tx.id, TransactionStatus::Completed, None)
            .await
            .unwrap();
        store.delete_transaction(tx.id).await.unwrap();
        let stored = store.listing(item.id).await.unwrap().unwrap();
        assert_eq!(stored.availability, Availability::Sold);
    }

    #[tokio::test]
    async fn stale_status_write_cannot_resurrect_settled_transaction() {
        let store = InMemoryStore::new();
        let seller = user("S", "s@example.com");
        store.insert_user(&seller).await.unwrap();
        let item = listing(seller.id, "Laptop", 100);
        store.insert_listing(&item).await.unwrap();
        let tx = purchase_of(&item, UserId::new());
        store.create_purchase(&tx).await.unwrap();

        store
            .set_transaction_status(tx.id, TransactionStatus::Completed, None)
            .await
            .unwrap();

        // A caller that checked the status before the completion landed
        // still carries the revert; it must lose and write nothing.
        let result = store
            .set_transaction_status(
                tx.id,
                TransactionStatus::Cancelled,
                Some((item.id, Availability::Available)),
            )
            .await;
        assert!(matches!(
            result,
            Err(StoreError::TransactionSettled { .. })
        ));

        let stored_tx = store.transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored_tx.status, TransactionStatus::Completed);
        let stored = store.listing(item.id).await.unwrap().unwrap();
        assert_eq!(stored.availability, Availability::Sold);
    }

    #[tokio::test]
    async fn insert_token_sweeps_expired_rows() {
        let store = InMemoryStore::new();
        let owner = user("S", "s@example.com");
        store.insert_user(&owner).await.unwrap();

        let now = Utc::now();
        store
            .insert_token(&AuthTokenRecord {
                token: "stale".to_string(),
                user_id: owner.id,
                issued_at: now - chrono::Duration::days(8),
                expires_at: now - chrono::Duration::days(1),
            })
            .await
            .unwrap();
        store
            .insert_token(&AuthTokenRecord {
                token: "fresh".to_string(),
                user_id: owner.id,
                issued_at: now,
                expires_at: now + chrono::Duration::days(7),
            })
            .await
            .unwrap();

        assert!(store.token("stale").await.unwrap().is_none());
        assert!(store.token("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn find_listings_filters_and_sorts() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let mut cheap = listing(owner, "Blue Bike", 100);
        cheap.category = Some("sports".to_string());
        let pricey = listing(owner, "Mountain Bike", 900);
        let other = listing(owner, "Desk Lamp", 50);
        store.insert_listing(&cheap).await.unwrap();
        store.insert_listing(&pricey).await.unwrap();
        store.insert_listing(&other).await.unwrap();

        // Case-insensitive substring search.
        let filter = ListingFilter::default().with_search("bike");
        let found = store.find_listings(&filter).await.unwrap();
        assert_eq!(found.len(), 2);

        // Price range.
        let filter = ListingFilter::default()
            .with_price_range(Some(Money::from_minor(60)), Some(Money::from_minor(500)));
        let found = store.find_listings(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Blue Bike");

        // Category.
        let filter = ListingFilter::default().with_category("sports");
        let found = store.find_listings(&filter).await.unwrap();
        assert_eq!(found.len(), 1);

        // Price ascending.
        let filter = ListingFilter::default().sorted(SortField::Price, SortOrder::Asc);
        let found = store.find_listings(&filter).await.unwrap();
        let prices: Vec<i64> = found.iter().map(|l| l.price.minor()).collect();
        assert_eq!(prices, vec![50, 100, 900]);
    }

    #[tokio::test]
    async fn find_listings_hides_sold_by_default() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let mut sold = listing(owner, "Gone", 100);
        sold.availability = Availability::Sold;
        store.insert_listing(&sold).await.unwrap();
        store
            .insert_listing(&listing(owner, "Here", 100))
            .await
            .unwrap();

        let found = store.find_listings(&ListingFilter::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Here");

        let filter = ListingFilter::default().with_availability(Availability::Sold);
        let found = store.find_listings(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Gone");
    }

    #[tokio::test]
    async fn purge_removes_all_traces() {
        let store = InMemoryStore::new();
        let seller = user("S", "s@example.com");
        let buyer = user("B", "b@example.com");
        store.insert_user(&seller).await.unwrap();
        store.insert_user(&buyer).await.unwrap();

        let item1 = listing(seller.id, "One", 100);
        let item2 = listing(seller.id, "Two", 200);
        store.insert_listing(&item1).await.unwrap();
        store.insert_listing(&item2).await.unwrap();
        let tx = purchase_of(&item1, buyer.id);
        store.create_purchase(&tx).await.unwrap();
        store
            .insert_token(&AuthTokenRecord {
                token: "tok".to_string(),
                user_id: seller.id,
                issued_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::days(7),
            })
            .await
            .unwrap();

        store.purge_user(seller.id).await.unwrap();

        assert!(store.user(seller.id).await.unwrap().is_none());
        assert!(store.listing(item1.id).await.unwrap().is_none());
        assert!(store.listing(item2.id).await.unwrap().is_none());
        assert!(store.transaction(tx.id).await.unwrap().is_none());
        assert!(store.token("tok").await.unwrap().is_none());
        // The counterparty survives.
        assert!(store.user(buyer.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_listing_does_not_touch_availability() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let item = listing(owner, "Laptop", 100);
        store.insert_listing(&item).await.unwrap();
        store
            .create_purchase(&purchase_of(&item, UserId::new()))
            .await
            .unwrap();

        let mut edited = item.clone();
        edited.name = "Laptop (renamed)".to_string();
        edited.availability = Availability::Available; // stale in-memory copy
        store.update_listing(&edited).await.unwrap();

        let stored = store.listing(item.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Laptop (renamed)");
        assert_eq!(stored.availability, Availability::Sold);
    }
}
