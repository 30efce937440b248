//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::MarketError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or unusable bearer token.
    Unauthorized(String),
    /// Domain logic error.
    Market(MarketError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Market(err) => market_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn market_error_to_response(err: MarketError) -> (StatusCode, String) {
    match err {
        MarketError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
        MarketError::Authorization(msg) => (StatusCode::FORBIDDEN, msg),
        MarketError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        MarketError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        MarketError::Store(e) => {
            // Store detail stays in the logs, never in the response.
            tracing::error!(error = %e, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
        }
    }
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        ApiError::Market(err)
    }
}
