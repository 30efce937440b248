use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::{ListingId, Money, TransactionId, UserId};

use crate::error::{Result, StoreError};
use crate::filter::{ListingFilter, SortField, SortOrder, TransactionRole};
use crate::records::{
    AuthTokenRecord, Availability, Condition, ListingRecord, TransactionRecord, TransactionStatus,
    UserRecord,
};
use crate::store::MarketStore;

const LISTING_COLUMNS: &str = "id, owner_id, name, description, category, price, condition, \
     location, image_ref, availability, created_at";

const TRANSACTION_COLUMNS: &str = "id, listing_id, buyer_id, seller_id, quantity, total_price, \
     status, payment_method, shipping_address, created_at";

/// PostgreSQL-backed market store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL market store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    fn row_to_user(row: PgRow) -> Result<UserRecord> {
        Ok(UserRecord {
            id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            credential_hash: row.try_get("credential_hash")?,
            phone: row.try_get("phone")?,
            address: row.try_get("address")?,
            avatar_ref: row.try_get("avatar_ref")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_listing(row: PgRow) -> Result<ListingRecord> {
        let availability: String = row.try_get("availability")?;
        let availability =
            Availability::parse(&availability).ok_or(StoreError::InvalidColumn {
                column: "availability",
                value: availability.clone(),
            })?;
        let condition: Option<String> = row.try_get("condition")?;
        let condition = condition
            .map(|c| {
                Condition::parse(&c).ok_or(StoreError::InvalidColumn {
                    column: "condition",
                    value: c.clone(),
                })
            })
            .transpose()?;

        Ok(ListingRecord {
            id: ListingId::from_uuid(row.try_get::<Uuid, _>("id")?),
            owner_id: UserId::from_uuid(row.try_get::<Uuid, _>("owner_id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            price: Money::from_minor(row.try_get("price")?),
            condition,
            location: row.try_get("location")?,
            image_ref: row.try_get("image_ref")?,
            availability,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_transaction(row: PgRow) -> Result<TransactionRecord> {
        let status: String = row.try_get("status")?;
        let status = TransactionStatus::parse(&status).ok_or(StoreError::InvalidColumn {
            column: "status",
            value: status.clone(),
        })?;
        let quantity: i32 = row.try_get("quantity")?;

        Ok(TransactionRecord {
            id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            listing_id: ListingId::from_uuid(row.try_get::<Uuid, _>("listing_id")?),
            buyer_id: UserId::from_uuid(row.try_get::<Uuid, _>("buyer_id")?),
            seller_id: UserId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
            quantity: quantity as u32,
            total_price: Money::from_minor(row.try_get("total_price")?),
            status,
            payment_method: row.try_get("payment_method")?,
            shipping_address: row.try_get("shipping_address")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_token(row: PgRow) -> Result<AuthTokenRecord> {
        Ok(AuthTokenRecord {
            token: row.try_get("token")?,
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn map_email_conflict(e: sqlx::Error, email: &str) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some("users_email_key")
        {
            return StoreError::DuplicateEmail {
                email: email.to_string(),
            };
        }
        StoreError::Database(e)
    }
}

#[async_trait]
impl MarketStore for PostgresStore {
    async fn insert_user(&self, user: &UserRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, credential_hash, phone, address, avatar_ref, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.credential_hash)
        .bind(&user.phone)
        .bind(&user.address)
        .bind(&user.avatar_ref)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_email_conflict(e, &user.email))?;

        Ok(())
    }

    async fn user(&self, id: UserId) -> Result<Option<UserRecord>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn update_user(&self, user: &UserRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, email = $3, credential_hash = $4, phone = $5, address = $6, avatar_ref = $7
            WHERE id = $1
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.credential_hash)
        .bind(&user.phone)
        .bind(&user.address)
        .bind(&user.avatar_ref)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_email_conflict(e, &user.email))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                entity: "user",
                id: user.id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_listing(&self, listing: &ListingRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO listings (id, owner_id, name, description, category, price, condition, location, image_ref, availability, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(listing.id.as_uuid())
        .bind(listing.owner_id.as_uuid())
        .bind(&listing.name)
        .bind(&listing.description)
        .bind(&listing.category)
        .bind(listing.price.minor())
        .bind(listing.condition.map(|c| c.as_str()))
        .bind(&listing.location)
        .bind(&listing.image_ref)
        .bind(listing.availability.as_str())
        .bind(listing.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn listing(&self, id: ListingId) -> Result<Option<ListingRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_listing).transpose()
    }

    async fn update_listing(&self, listing: &ListingRecord) -> Result<()> {
        // Availability, owner, and created_at are deliberately not written.
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET name = $2, description = $3, category = $4, price = $5, condition = $6, location = $7, image_ref = $8
            WHERE id = $1
            "#,
        )
        .bind(listing.id.as_uuid())
        .bind(&listing.name)
        .bind(&listing.description)
        .bind(&listing.category)
        .bind(listing.price.minor())
        .bind(listing.condition.map(|c| c.as_str()))
        .bind(&listing.location)
        .bind(&listing.image_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                entity: "listing",
                id: listing.id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_listing(&self, id: ListingId) -> Result<()> {
        let result = sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                entity: "listing",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn find_listings(&self, filter: &ListingFilter) -> Result<Vec<ListingRecord>> {
        let mut sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE availability = $1");
        let mut param_count = 1;

        // Build dynamic query
        if filter.search.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND name ILIKE ${param_count}"));
        }
        if filter.category.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND category = ${param_count}"));
        }
        if filter.min_price.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND price >= ${param_count}"));
        }
        if filter.max_price.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND price <= ${param_count}"));
        }

        let column = match filter.sort_by {
            SortField::Date => "created_at",
            SortField::Price => "price",
            SortField::Name => "name",
        };
        let direction = match filter.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {column} {direction}"));

        let mut sqlx_query =
            sqlx::query(&sql).bind(filter.effective_availability().as_str());

        if let Some(ref search) = filter.search {
            // Escape LIKE metacharacters so the search stays a plain
            // substring match.
            let escaped = search.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
            sqlx_query = sqlx_query.bind(format!("%{escaped}%"));
        }
        if let Some(ref category) = filter.category {
            sqlx_query = sqlx_query.bind(category);
        }
        if let Some(min) = filter.min_price {
            sqlx_query = sqlx_query.bind(min.minor());
        }
        if let Some(max) = filter.max_price {
            sqlx_query = sqlx_query.bind(max.minor());
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_listing).collect()
    }

    async fn listings_by_owner(
        &self,
        owner: UserId,
        availability: Option<Availability>,
    ) -> Result<Vec<ListingRecord>> {
        let rows = match availability {
            Some(availability) => {
                sqlx::query(&format!(
                    "SELECT {LISTING_COLUMNS} FROM listings \
                     WHERE owner_id = $1 AND availability = $2 ORDER BY created_at DESC"
                ))
                .bind(owner.as_uuid())
                .bind(availability.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {LISTING_COLUMNS} FROM listings \
                     WHERE owner_id = $1 ORDER BY created_at DESC"
                ))
                .bind(owner.as_uuid())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Self::row_to_listing).collect()
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn transactions_for_user(
        &self,
        user: UserId,
        role: TransactionRole,
    ) -> Result<Vec<TransactionRecord>> {
        let condition = match role {
            TransactionRole::Buyer => "buyer_id = $1",
            TransactionRole::Seller => "seller_id = $1",
            TransactionRole::Either => "(buyer_id = $1 OR seller_id = $1)",
        };
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE {condition} ORDER BY created_at DESC"
        ))
        .bind(user.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn pending_transaction_for_listing(
        &self,
        listing: ListingId,
    ) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE listing_id = $1 AND status = 'pending' LIMIT 1"
        ))
        .bind(listing.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn insert_token(&self, token: &AuthTokenRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Opportunistic sweep: every new session clears out dead rows.
        sqlx::query("DELETE FROM auth_tokens WHERE expires_at <= NOW()")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO auth_tokens (token, user_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&token.token)
        .bind(token.user_id.as_uuid())
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn token(&self, token: &str) -> Result<Option<AuthTokenRecord>> {
        let row = sqlx::query("SELECT * FROM auth_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_token).transpose()
    }

    async fn delete_token(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_purchase(&self, transaction: &TransactionRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Conditional flip: only one of two racing purchases sees the row
        // still available, the other matches zero rows and loses.
        let flipped = sqlx::query(
            r#"
            UPDATE listings
            SET availability = 'sold'
            WHERE id = $1 AND availability = 'available'
            "#,
        )
        .bind(transaction.listing_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM listings WHERE id = $1)")
                    .bind(transaction.listing_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(if exists {
                tracing::debug!(listing_id = %transaction.listing_id, "purchase lost the availability race");
                StoreError::ListingUnavailable {
                    listing_id: transaction.listing_id,
                }
            } else {
                StoreError::RowNotFound {
                    entity: "listing",
                    id: transaction.listing_id.to_string(),
                }
            });
        }

        sqlx::query(
            r#"
            INSERT INTO transactions (id, listing_id, buyer_id, seller_id, quantity, total_price, status, payment_method, shipping_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.listing_id.as_uuid())
        .bind(transaction.buyer_id.as_uuid())
        .bind(transaction.seller_id.as_uuid())
        .bind(transaction.quantity as i32)
        .bind(transaction.total_price.minor())
        .bind(transaction.status.as_str())
        .bind(&transaction.payment_method)
        .bind(&transaction.shipping_address)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_transaction_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        listing_availability: Option<(ListingId, Availability)>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Conditional write: a racing caller that passed its own status
        // check against a stale copy matches zero rows here and loses.
        let result =
            sqlx::query("UPDATE transactions SET status = $2 WHERE id = $1 AND status = 'pending'")
                .bind(id.as_uuid())
                .bind(status.as_str())
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM transactions WHERE id = $1)")
                    .bind(id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(if exists {
                StoreError::TransactionSettled { transaction_id: id }
            } else {
                StoreError::RowNotFound {
                    entity: "transaction",
                    id: id.to_string(),
                }
            });
        }

        if let Some((listing_id, availability)) = listing_availability {
            // The listing may have been deleted after the sale; matching
            // zero rows here is fine.
            sqlx::query("UPDATE listings SET availability = $2 WHERE id = $1")
                .bind(listing_id.as_uuid())
                .bind(availability.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // The revert decision reads the row being deleted, so a racing
        // settlement can never be undone by a stale status copy.
        let row = sqlx::query("DELETE FROM transactions WHERE id = $1 RETURNING listing_id, status")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::RowNotFound {
                entity: "transaction",
                id: id.to_string(),
            });
        };

        let status: String = row.try_get("status")?;
        let status = TransactionStatus::parse(&status).ok_or(StoreError::InvalidColumn {
            column: "status",
            value: status.clone(),
        })?;

        if status != TransactionStatus::Completed {
            let listing_id: Uuid = row.try_get("listing_id")?;
            sqlx::query("UPDATE listings SET availability = 'available' WHERE id = $1")
                .bind(listing_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn purge_user(&self, user: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM transactions WHERE buyer_id = $1 OR seller_id = $1")
            .bind(user.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM listings WHERE owner_id = $1")
            .bind(user.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1")
            .bind(user.as_uuid())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user.as_uuid())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                entity: "user",
                id: user.to_string(),
            });
        }

        tx.commit().await?;
        Ok(())
    }
}
