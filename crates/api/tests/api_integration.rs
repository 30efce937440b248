//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    let store = InMemoryStore::new();
    let state = api::create_default_state(store);
    api::create_app(state, get_metrics_handle())
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    // Rejections raised before a handler runs (e.g. a malformed path ID)
    // carry plain-text bodies.
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Registers a user and returns (token, user_id).
async fn register(app: &axum::Router, name: &str, email: &str) -> (String, String) {
    let (status, json) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(serde_json::json!({
            "name": name,
            "email": email,
            "password": "hunter22",
            "address": "1 Main St"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (
        json["token"].as_str().unwrap().to_string(),
        json["user"]["id"].as_str().unwrap().to_string(),
    )
}

async fn create_listing(app: &axum::Router, token: &str, name: &str, price: i64) -> String {
    let (status, json) = send(
        app,
        "POST",
        "/listings",
        Some(token),
        Some(serde_json::json!({ "name": name, "price": price })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_check() {
    let app = setup();
    let (status, json) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let app = setup();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_flow() {
    let app = setup();
    let (token, _) = register(&app, "Ana", "ana@example.com").await;

    // Registered session works.
    let (status, profile) = send(&app, "GET", "/account", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["email"], "ana@example.com");
    assert!(profile.get("credential_hash").is_none());

    // Login issues a fresh token.
    let (status, json) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(serde_json::json!({ "email": "ana@example.com", "password": "hunter22" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let login_token = json["token"].as_str().unwrap().to_string();
    assert_ne!(login_token, token);

    // Wrong password is a 403 with no account detail.
    let (status, _) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(serde_json::json!({ "email": "ana@example.com", "password": "wrong!" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Logout revokes the token.
    let (status, _) = send(&app, "POST", "/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", "/account", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Missing token is a 401.
    let (status, _) = send(&app, "GET", "/account", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn listing_crud_and_authorization() {
    let app = setup();
    let (owner_token, owner_id) = register(&app, "Owner", "owner@example.com").await;
    let (other_token, _) = register(&app, "Other", "other@example.com").await;

    let listing_id = create_listing(&app, &owner_token, "Road Bike", 25_000).await;

    // Anonymous detail has no viewer flags.
    let (status, json) = send(&app, "GET", &format!("/listings/{listing_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["owner_id"], owner_id.as_str());
    assert!(json.get("is_owner").is_none());

    // Owner sees is_owner, cannot purchase their own item.
    let (_, json) = send(
        &app,
        "GET",
        &format!("/listings/{listing_id}"),
        Some(&owner_token),
        None,
    )
    .await;
    assert_eq!(json["is_owner"], true);
    assert_eq!(json["can_purchase"], false);

    // Another signed-in user can purchase.
    let (_, json) = send(
        &app,
        "GET",
        &format!("/listings/{listing_id}"),
        Some(&other_token),
        None,
    )
    .await;
    assert_eq!(json["is_owner"], false);
    assert_eq!(json["can_purchase"], true);

    // Non-owner cannot edit or delete.
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/listings/{listing_id}"),
        Some(&other_token),
        Some(serde_json::json!({ "price": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/listings/{listing_id}"),
        Some(&other_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Owner edits; availability is not editable through the patch.
    let (status, json) = send(
        &app,
        "PUT",
        &format!("/listings/{listing_id}"),
        Some(&owner_token),
        Some(serde_json::json!({ "price": 20_000, "description": "barely used" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["price"], 20_000);
    assert_eq!(json["availability"], "available");

    // Browse finds it; /listings/mine is owner-scoped.
    let (_, json) = send(&app, "GET", "/listings?search=road", None, None).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    let (_, json) = send(&app, "GET", "/listings/mine", Some(&other_token), None).await;
    assert_eq!(json.as_array().unwrap().len(), 0);
    let (_, json) = send(&app, "GET", "/listings/mine", Some(&owner_token), None).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    // Owner deletes.
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/listings/{listing_id}"),
        Some(&owner_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", &format!("/listings/{listing_id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_validation_errors() {
    let app = setup();
    let (token, _) = register(&app, "Ana", "ana@example.com").await;

    let (status, _) = send(
        &app,
        "POST",
        "/listings",
        Some(&token),
        Some(serde_json::json!({ "name": "   ", "price": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/listings",
        Some(&token),
        Some(serde_json::json!({ "name": "Thing", "price": -5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/listings?status=bogus", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn purchase_conflict_cancel_repurchase() {
    let app = setup();
    let (seller_token, _) = register(&app, "Seller", "seller@example.com").await;
    let (buyer_token, _) = register(&app, "Buyer", "buyer@example.com").await;
    let (buyer2_token, _) = register(&app, "Buyer2", "buyer2@example.com").await;

    let listing_id = create_listing(&app, &seller_token, "Camera", 45_000).await;

    // Purchase freezes price × quantity and defaults.
    let (status, tx) = send(
        &app,
        "POST",
        "/transactions",
        Some(&buyer_token),
        Some(serde_json::json!({ "listing_id": listing_id, "quantity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tx["total_price"], 90_000);
    assert_eq!(tx["status"], "pending");
    assert_eq!(tx["payment_method"], "cash");
    assert_eq!(tx["shipping_address"], "1 Main St");
    let tx_id = tx["id"].as_str().unwrap().to_string();

    // The listing is off the market; a second purchase conflicts.
    let (_, listing) = send(&app, "GET", &format!("/listings/{listing_id}"), None, None).await;
    assert_eq!(listing["availability"], "sold");
    let (status, _) = send(
        &app,
        "POST",
        "/transactions",
        Some(&buyer2_token),
        Some(serde_json::json!({ "listing_id": listing_id, "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Deleting the listing is refused while the transaction is pending.
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/listings/{listing_id}"),
        Some(&seller_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Buyer cannot settle; seller cancels.
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/transactions/{tx_id}"),
        Some(&buyer_token),
        Some(serde_json::json!({ "status": "cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, tx) = send(
        &app,
        "PUT",
        &format!("/transactions/{tx_id}"),
        Some(&seller_token),
        Some(serde_json::json!({ "status": "cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tx["status"], "cancelled");

    // Terminal states are final.
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/transactions/{tx_id}"),
        Some(&seller_token),
        Some(serde_json::json!({ "status": "completed" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Back on the market; the other buyer succeeds now.
    let (_, listing) = send(&app, "GET", &format!("/listings/{listing_id}"), None, None).await;
    assert_eq!(listing["availability"], "available");
    let (status, _) = send(
        &app,
        "POST",
        "/transactions",
        Some(&buyer2_token),
        Some(serde_json::json!({ "listing_id": listing_id, "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn self_purchase_and_bad_quantity_rejected() {
    let app = setup();
    let (seller_token, _) = register(&app, "Seller", "seller@example.com").await;
    let listing_id = create_listing(&app, &seller_token, "Camera", 45_000).await;

    let (status, json) = send(
        &app,
        "POST",
        "/transactions",
        Some(&seller_token),
        Some(serde_json::json!({ "listing_id": listing_id, "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("own listing"));

    let (buyer_token, _) = register(&app, "Buyer", "buyer@example.com").await;
    let (status, _) = send(
        &app,
        "POST",
        "/transactions",
        Some(&buyer_token),
        Some(serde_json::json!({ "listing_id": listing_id, "quantity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn transactions_are_private_to_their_parties() {
    let app = setup();
    let (seller_token, _) = register(&app, "Seller", "seller@example.com").await;
    let (buyer_token, _) = register(&app, "Buyer", "buyer@example.com").await;
    let (stranger_token, _) = register(&app, "Stranger", "x@example.com").await;

    let listing_id = create_listing(&app, &seller_token, "Camera", 45_000).await;
    let (_, tx) = send(
        &app,
        "POST",
        "/transactions",
        Some(&buyer_token),
        Some(serde_json::json!({ "listing_id": listing_id, "quantity": 1 })),
    )
    .await;
    let tx_id = tx["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "GET",
        &format!("/transactions/{tx_id}"),
        Some(&stranger_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    for token in [&buyer_token, &seller_token] {
        let (status, _) = send(&app, "GET", &format!("/transactions/{tx_id}"), Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    // Role filters.
    let (_, json) = send(&app, "GET", "/transactions?role=buyer", Some(&buyer_token), None).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    let (_, json) = send(&app, "GET", "/transactions?role=seller", Some(&buyer_token), None).await;
    assert_eq!(json.as_array().unwrap().len(), 0);
    let (_, json) = send(&app, "GET", "/transactions", Some(&seller_token), None).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    let (_, json) = send(&app, "GET", "/transactions", Some(&stranger_token), None).await;
    assert_eq!(json.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn account_purge_cascades() {
    let app = setup();
    let (seller_token, _) = register(&app, "Seller", "seller@example.com").await;
    let (buyer_token, _) = register(&app, "Buyer", "buyer@example.com").await;

    let listing_id = create_listing(&app, &seller_token, "Camera", 45_000).await;
    send(
        &app,
        "POST",
        "/transactions",
        Some(&buyer_token),
        Some(serde_json::json!({ "listing_id": listing_id, "quantity": 1 })),
    )
    .await;

    // Wrong password leaves everything in place.
    let (status, _) = send(
        &app,
        "DELETE",
        "/account",
        Some(&seller_token),
        Some(serde_json::json!({ "password": "wrong!" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "DELETE",
        "/account",
        Some(&seller_token),
        Some(serde_json::json!({ "password": "hunter22" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Listings, transactions, and the session are gone.
    let (status, _) = send(&app, "GET", &format!("/listings/{listing_id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, json) = send(&app, "GET", "/transactions", Some(&buyer_token), None).await;
    assert_eq!(json.as_array().unwrap().len(), 0);
    let (status, _) = send(&app, "GET", "/account", Some(&seller_token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The email can register again.
    register(&app, "Seller", "seller@example.com").await;
}

#[tokio::test]
async fn profile_update_and_password_change() {
    let app = setup();
    let (token, _) = register(&app, "Ana", "ana@example.com").await;

    let (status, json) = send(
        &app,
        "PUT",
        "/account",
        Some(&token),
        Some(serde_json::json!({ "phone": "555-0100" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["phone"], "555-0100");
    assert_eq!(json["name"], "Ana");

    // Password change needs the current password.
    let (status, _) = send(
        &app,
        "PUT",
        "/account",
        Some(&token),
        Some(serde_json::json!({ "password": { "current": "nope", "new": "hunter23" } })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "PUT",
        "/account",
        Some(&token),
        Some(serde_json::json!({ "password": { "current": "hunter22", "new": "hunter23" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(serde_json::json!({ "email": "ana@example.com", "password": "hunter23" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn invalid_id_format_is_bad_request() {
    let app = setup();
    let (status, _) = send(&app, "GET", "/listings/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let app = setup();
    let (token, _) = register(&app, "Ana", "ana@example.com").await;
    let fake = uuid::Uuid::new_v4();

    let (status, _) = send(&app, "GET", &format!("/listings/{fake}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        "/transactions",
        Some(&token),
        Some(serde_json::json!({ "listing_id": fake, "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
