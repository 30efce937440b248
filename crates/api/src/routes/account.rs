//! Registration, sessions, profile, and account deletion.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::{NewUser, ProfilePatch};
use serde::{Deserialize, Serialize};
use store::{MarketStore, UserRecord};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{AuthUser, BearerToken};

// -- Request types --

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct PurgeRequest {
    pub password: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: UserRecord,
}

// -- Handlers --

/// POST /auth/register — create an account and sign it in.
#[tracing::instrument(skip(state, req))]
pub async fn register<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session = state.accounts.register(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token: session.token,
            user: session.user,
        }),
    ))
}

/// POST /auth/login — sign in with email and password.
#[tracing::instrument(skip(state, req))]
pub async fn login<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.accounts.login(&req.email, &req.password).await?;
    Ok(Json(SessionResponse {
        token: session.token,
        user: session.user,
    }))
}

/// POST /auth/logout — revoke the presented token.
#[tracing::instrument(skip(state, token))]
pub async fn logout<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    BearerToken(token): BearerToken,
) -> Result<StatusCode, ApiError> {
    state.accounts.logout(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /account — the caller's profile.
#[tracing::instrument(skip(state))]
pub async fn profile<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
) -> Result<Json<UserRecord>, ApiError> {
    Ok(Json(state.accounts.profile(user).await?))
}

/// PUT /account — partial profile update.
#[tracing::instrument(skip(state, patch))]
pub async fn update_profile<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<UserRecord>, ApiError> {
    Ok(Json(state.accounts.update_profile(user, patch).await?))
}

/// DELETE /account — purge the account and everything it touches.
#[tracing::instrument(skip(state, req))]
pub async fn purge<S: MarketStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user): AuthUser,
    Json(req): Json<PurgeRequest>,
) -> Result<StatusCode, ApiError> {
    state.accounts.purge(user, &req.password).await?;
    Ok(StatusCode::NO_CONTENT)
}
