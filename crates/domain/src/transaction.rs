//! Transaction lifecycle engine.

use chrono::Utc;
use serde::Deserialize;

use common::{ListingId, TransactionId, UserId};
use store::{
    Availability, MarketStore, StoreError, TransactionRecord, TransactionRole, TransactionStatus,
};

use crate::error::{MarketError, Result};

const DEFAULT_PAYMENT_METHOD: &str = "cash";

/// Largest quantity the store can persist.
const MAX_QUANTITY: u32 = i32::MAX as u32;

/// Input for purchasing a listing.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseRequest {
    pub listing_id: ListingId,
    pub quantity: u32,
    /// Defaults to `"cash"` when omitted.
    pub payment_method: Option<String>,
    /// Defaults to the buyer's stored address when omitted.
    pub shipping_address: Option<String>,
}

/// Service for managing transactions.
pub struct TransactionService<S> {
    store: S,
}

impl<S: MarketStore> TransactionService<S> {
    /// Creates a new transaction service backed by the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Purchases a listing on behalf of `buyer`.
    ///
    /// The total price is `price × quantity`, frozen here; the seller is
    /// copied from the listing owner and never re-derived. The flip to
    /// `sold` and the transaction insert commit together, so of two
    /// concurrent purchases exactly one succeeds and the other gets a
    /// conflict.
    #[tracing::instrument(skip(self, req))]
    pub async fn purchase(&self, buyer: UserId, req: PurchaseRequest) -> Result<TransactionRecord> {
        if req.quantity < 1 {
            return Err(MarketError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        if req.quantity > MAX_QUANTITY {
            return Err(MarketError::Validation(format!(
                "quantity must be at most {MAX_QUANTITY}"
            )));
        }

        let listing = self
            .store
            .listing(req.listing_id)
            .await?
            .ok_or_else(|| {
                MarketError::NotFound(format!("listing not found: {}", req.listing_id))
            })?;
        if listing.availability != Availability::Available {
            return Err(MarketError::Conflict("item unavailable".to_string()));
        }
        if listing.owner_id == buyer {
            return Err(MarketError::Validation(
                "cannot purchase your own listing".to_string(),
            ));
        }

        let buyer_record = self
            .store
            .user(buyer)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("user not found: {buyer}")))?;
        let shipping_address = req
            .shipping_address
            .or(buyer_record.address)
            .unwrap_or_default();

        let record = TransactionRecord {
            id: TransactionId::new(),
            listing_id: listing.id,
            buyer_id: buyer,
            seller_id: listing.owner_id,
            quantity: req.quantity,
            total_price: listing.price.multiply(req.quantity),
            status: TransactionStatus::Pending,
            payment_method: req
                .payment_method
                .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string()),
            shipping_address,
            created_at: Utc::now(),
        };

        match self.store.create_purchase(&record).await {
            Ok(()) => {
                metrics::counter!("purchases_total").increment(1);
                Ok(record)
            }
            Err(e @ StoreError::ListingUnavailable { .. }) => {
                metrics::counter!("purchase_conflicts_total").increment(1);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Moves a pending transaction to a terminal status. Seller only.
    ///
    /// `completed` keeps the listing `sold`; `cancelled` puts it back on
    /// the market. A transaction already in a terminal status is left
    /// untouched; the store enforces this atomically, so two racing
    /// settlement calls cannot both land.
    #[tracing::instrument(skip(self))]
    pub async fn set_status(
        &self,
        tx_id: TransactionId,
        actor: UserId,
        new_status: TransactionStatus,
    ) -> Result<TransactionRecord> {
        let mut tx = self.load(tx_id).await?;
        if tx.seller_id != actor {
            return Err(MarketError::Authorization(
                "only the seller can update a transaction".to_string(),
            ));
        }
        let availability = match new_status {
            TransactionStatus::Completed => Availability::Sold,
            TransactionStatus::Cancelled => Availability::Available,
            TransactionStatus::Pending => {
                return Err(MarketError::Validation(
                    "status must be completed or cancelled".to_string(),
                ));
            }
        };
        if tx.status.is_terminal() {
            return Err(MarketError::Conflict(format!(
                "transaction already {}",
                tx.status
            )));
        }

        self.store
            .set_transaction_status(tx_id, new_status, Some((tx.listing_id, availability)))
            .await?;
        tx.status = new_status;
        Ok(tx)
    }

    /// Deletes a transaction record. Buyer or seller.
    ///
    /// A `pending` or `cancelled` transaction puts the listing back on
    /// the market; deleting a `completed` one leaves it `sold`. The store
    /// decides from the row it deletes, not from the copy read here.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, tx_id: TransactionId, actor: UserId) -> Result<()> {
        let tx = self.load(tx_id).await?;
        if tx.buyer_id != actor && tx.seller_id != actor {
            return Err(MarketError::Authorization(
                "only the buyer or seller can delete a transaction".to_string(),
            ));
        }
        self.store.delete_transaction(tx_id).await?;
        Ok(())
    }

    /// Detail lookup, restricted to the two parties.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, tx_id: TransactionId, actor: UserId) -> Result<TransactionRecord> {
        let tx = self.load(tx_id).await?;
        if tx.buyer_id != actor && tx.seller_id != actor {
            return Err(MarketError::Authorization(
                "only the buyer or seller can view a transaction".to_string(),
            ));
        }
        Ok(tx)
    }

    /// A user's transactions in the given role, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list(
        &self,
        user: UserId,
        role: TransactionRole,
    ) -> Result<Vec<TransactionRecord>> {
        Ok(self.store.transactions_for_user(user, role).await?)
    }

    async fn load(&self, tx_id: TransactionId) -> Result<TransactionRecord> {
        self.store
            .transaction(tx_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("transaction not found: {tx_id}")))
    }
}
