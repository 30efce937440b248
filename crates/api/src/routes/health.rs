//! Liveness endpoint.

use axum::Json;
use serde_json::{Value, json};

/// GET /health — answers as soon as the server is accepting connections.
pub async fn check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
