//! Listing catalogue endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{ListingId, Money};
use domain::{ListingPatch, NewListing};
use serde::{Deserialize, Serialize};
use store::{Availability, ListingFilter, ListingRecord, MarketStore, SortField, SortOrder};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{AuthUser, MaybeAuthUser};

// -- Request types --

#[derive(Deserialize)]
pub struct BrowseQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort_by: Option<SortField>,
    pub order: Option<SortOrder>,
}

#[derive(Deserialize)]
pub struct OwnedQuery {
    pub status: Option<String>,
}

// -- Response types --

/// Listing detail, with viewer-relative flags when a bearer token was
/// supplied.
#[derive(Serialize)]
pub struct ListingDetailResponse {
    #[serde(flatten)]
    pub listing: ListingRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_owner: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_purchase: Option<bool>,
}

fn parse_status(status: Option<&str>) -> Result<Option<Availability>, ApiError> {
    match status {
        None => Ok(None),
        Some(s) => Availability::parse(s)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid status: {s}"))),
    }
}

// -- Handlers --

/// GET /listings — public browse with search, filters, and sorting.
#[tracing::instrument(skip(state, query))]
pub async fn list<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<Vec<ListingRecord>>, ApiError> {
    let filter = ListingFilter {
        search: query.search,
        category: query.category,
        availability: parse_status(query.status.as_deref())?,
        min_price: query.min_price.map(Money::from_minor),
        max_price: query.max_price.map(Money::from_minor),
        sort_by: query.sort_by.unwrap_or_default(),
        order: query.order.unwrap_or_default(),
    };
    Ok(Json(state.listings.list(&filter).await?))
}

/// GET /listings/{id} — public detail; authenticated viewers also get
/// `is_owner` and `can_purchase`.
#[tracing::instrument(skip(state, viewer))]
pub async fn get<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    viewer: MaybeAuthUser,
    Path(id): Path<ListingId>,
) -> Result<Json<ListingDetailResponse>, ApiError> {
    let listing = state.listings.get(id).await?;
    let (is_owner, can_purchase) = match viewer.0 {
        Some(user) => {
            let is_owner = listing.owner_id == user;
            let can_purchase = !is_owner && listing.availability == Availability::Available;
            (Some(is_owner), Some(can_purchase))
        }
        None => (None, None),
    };
    Ok(Json(ListingDetailResponse {
        listing,
        is_owner,
        can_purchase,
    }))
}

/// GET /listings/mine — the caller's own listings, sold ones included.
#[tracing::instrument(skip(state, query))]
pub async fn mine<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Query(query): Query<OwnedQuery>,
) -> Result<Json<Vec<ListingRecord>>, ApiError> {
    let availability = parse_status(query.status.as_deref())?;
    Ok(Json(state.listings.list_owned(user, availability).await?))
}

/// POST /listings — create a listing owned by the caller.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Json(req): Json<NewListing>,
) -> Result<(StatusCode, Json<ListingRecord>), ApiError> {
    let listing = state.listings.create(user, req).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// PUT /listings/{id} — partial update, owner only.
#[tracing::instrument(skip(state, patch))]
pub async fn update<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<ListingId>,
    Json(patch): Json<ListingPatch>,
) -> Result<Json<ListingRecord>, ApiError> {
    Ok(Json(state.listings.update(id, user, patch).await?))
}

/// DELETE /listings/{id} — owner only; refused while a pending
/// transaction references the listing.
#[tracing::instrument(skip(state))]
pub async fn delete<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<ListingId>,
) -> Result<StatusCode, ApiError> {
    state.listings.delete(id, user).await?;
    Ok(StatusCode::NO_CONTENT)
}
