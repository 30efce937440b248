//! Transaction lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::TransactionId;
use domain::PurchaseRequest;
use serde::Deserialize;
use store::{MarketStore, TransactionRecord, TransactionRole, TransactionStatus};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::AuthUser;

// -- Request types --

#[derive(Deserialize)]
pub struct ListQuery {
    pub role: Option<TransactionRole>,
}

#[derive(Deserialize)]
pub struct StatusUpdateRequest {
    pub status: TransactionStatus,
}

// -- Handlers --

/// POST /transactions — purchase a listing.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(buyer): AuthUser,
    Json(req): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<TransactionRecord>), ApiError> {
    let tx = state.transactions.purchase(buyer, req).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// GET /transactions — the caller's transactions, optionally narrowed to
/// one role.
#[tracing::instrument(skip(state, query))]
pub async fn list<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let role = query.role.unwrap_or_default();
    Ok(Json(state.transactions.list(user, role).await?))
}

/// GET /transactions/{id} — detail, buyer or seller only.
#[tracing::instrument(skip(state))]
pub async fn get<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<TransactionId>,
) -> Result<Json<TransactionRecord>, ApiError> {
    Ok(Json(state.transactions.get(id, user).await?))
}

/// PUT /transactions/{id} — settle or cancel, seller only.
#[tracing::instrument(skip(state, req))]
pub async fn set_status<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<TransactionId>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<TransactionRecord>, ApiError> {
    Ok(Json(state.transactions.set_status(id, user, req.status).await?))
}

/// DELETE /transactions/{id} — buyer or seller.
#[tracing::instrument(skip(state))]
pub async fn delete<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Path(id): Path<TransactionId>,
) -> Result<StatusCode, ApiError> {
    state.transactions.delete(id, user).await?;
    Ok(StatusCode::NO_CONTENT)
}
