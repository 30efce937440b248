//! Bearer-token extractors.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use common::UserId;
use store::MarketStore;

use crate::AppState;
use crate::error::ApiError;

/// The raw bearer token from the `Authorization` header.
pub struct BearerToken(pub String);

/// The authenticated caller. Rejects with 401 when the token is missing,
/// unknown, or expired.
pub struct AuthUser(pub UserId);

/// The caller if a bearer token was supplied, for public endpoints that
/// enrich their response for signed-in users. A supplied-but-bad token is
/// still a 401.
pub struct MaybeAuthUser(pub Option<UserId>);

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(parts)
            .map(BearerToken)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))
    }
}

impl<S> FromRequestParts<Arc<AppState<S>>> for AuthUser
where
    S: MarketStore + Clone + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
        let user_id = state
            .accounts
            .authenticate(&token)
            .await
            .map_err(|_| ApiError::Unauthorized("invalid or expired token".to_string()))?;
        Ok(AuthUser(user_id))
    }
}

impl<S> FromRequestParts<Arc<AppState<S>>> for MaybeAuthUser
where
    S: MarketStore + Clone + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(parts) {
            None => Ok(MaybeAuthUser(None)),
            Some(token) => {
                let user_id = state
                    .accounts
                    .authenticate(&token)
                    .await
                    .map_err(|_| ApiError::Unauthorized("invalid or expired token".to_string()))?;
                Ok(MaybeAuthUser(Some(user_id)))
            }
        }
    }
}
