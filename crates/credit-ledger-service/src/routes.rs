//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, orders, pricing, reports, usage, wallets};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for usage endpoints.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Orders
/// - `POST /orders` - Create a pending order
/// - `GET /orders/:order_id` - Get an order with its items
/// - `POST /orders/:order_id/finalize` - Confirm an order and issue credits
/// - `GET /clients/:client_id/orders` - List a client's orders
///
/// ## Wallets
/// - `GET /wallets/:client_id` - Current balance
/// - `GET /wallets/:client_id/ledger` - Ledger entries, newest first
/// - `POST /wallets/:client_id/topups` - Add the credits of a plan
/// - `GET /wallets/:client_id/reconciliation` - Balance vs. ledger (employee)
///
/// ## Usage (rate-limited)
/// - `POST /usage` - Price and debit a usage event
///
/// ## Pricing
/// - `GET /pricing` - Active pricing rules
/// - `POST /pricing` - Insert or update a rule (employee)
/// - `GET /pricing/quote` - Price usage without debiting
///
/// ## Reports
/// - `GET /reports/sales/monthly` - Confirmed sales per seller and month (employee)
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let usage_routes = Router::new()
        .route("/usage", post(usage::report_usage))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Orders
        .route("/orders", post(orders::create_order))
        .route("/orders/:order_id", get(orders::get_order))
        .route("/orders/:order_id/finalize", post(orders::finalize_order))
        .route("/clients/:client_id/orders", get(orders::list_client_orders))
        // Wallets
        .route("/wallets/:client_id", get(wallets::get_balance))
        .route("/wallets/:client_id/ledger", get(wallets::list_ledger))
        .route("/wallets/:client_id/topups", post(wallets::top_up))
        .route(
            "/wallets/:client_id/reconciliation",
            get(wallets::reconcile),
        )
        // Pricing
        .route(
            "/pricing",
            get(pricing::list_pricing).post(pricing::upsert_pricing),
        )
        .route("/pricing/quote", get(pricing::quote))
        // Reports
        .route(
            "/reports/sales/monthly",
            get(reports::seller_monthly_sales),
        )
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .merge(usage_routes)
        .merge(api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
