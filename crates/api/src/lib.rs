//! HTTP API server for the marketplace.
//!
//! Exposes the listing catalogue, the transaction lifecycle, and account
//! management over REST, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use domain::{AccountService, ListingService, TransactionService};
use metrics_exporter_prometheus::PrometheusHandle;
use store::MarketStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: MarketStore> {
    pub listings: ListingService<S>,
    pub transactions: TransactionService<S>,
    pub accounts: AccountService<S>,
}

/// Creates the application state from a store.
pub fn create_default_state<S: MarketStore + Clone + 'static>(store: S) -> Arc<AppState<S>> {
    Arc::new(AppState {
        listings: ListingService::new(store.clone()),
        transactions: TransactionService::new(store.clone()),
        accounts: AccountService::new(store),
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: MarketStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/auth/register", post(routes::account::register::<S>))
        .route("/auth/login", post(routes::account::login::<S>))
        .route("/auth/logout", post(routes::account::logout::<S>))
        .route("/account", get(routes::account::profile::<S>))
        .route("/account", put(routes::account::update_profile::<S>))
        .route("/account", delete(routes::account::purge::<S>))
        .route("/listings", get(routes::listings::list::<S>))
        .route("/listings", post(routes::listings::create::<S>))
        .route("/listings/mine", get(routes::listings::mine::<S>))
        .route("/listings/{id}", get(routes::listings::get::<S>))
        .route("/listings/{id}", put(routes::listings::update::<S>))
        .route("/listings/{id}", delete(routes::listings::delete::<S>))
        .route("/transactions", post(routes::transactions::create::<S>))
        .route("/transactions", get(routes::transactions::list::<S>))
        .route("/transactions/{id}", get(routes::transactions::get::<S>))
        .route(
            "/transactions/{id}",
            put(routes::transactions::set_status::<S>),
        )
        .route(
            "/transactions/{id}",
            delete(routes::transactions::delete::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
