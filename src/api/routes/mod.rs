use axum::{
    middleware as axum_middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::auth::middleware::auth_middleware;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/markets", get(handlers::market::list_markets))
        .route("/markets/trades", get(handlers::market::get_recent_trades))
        .route("/markets/:contract/book", get(handlers::market::get_contract_book))
        .route("/markets/:contract/depth", get(handlers::market::get_contract_depth))
        // Gateway ingestion
        .route("/internal/messaging/inbound", post(handlers::internal::inbound_message));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        // Orders
        .route("/orders", post(handlers::order::create_order))
        .route("/orders/:order_id", get(handlers::order::get_order))
        .route("/orders/:order_id", patch(handlers::order::update_order))
        .route("/orders/:order_id", delete(handlers::order::cancel_order))
        // Account
        .route("/account/orders", get(handlers::account::get_orders))
        .route("/account/trades", get(handlers::account::get_trades))
        .route("/account/summary", get(handlers::account::get_summary))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
