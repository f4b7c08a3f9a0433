//! Account view handlers

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::middleware::AuthUser;
use crate::db::AccountSummary;
use crate::models::{OrderResponse, Trade};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /account/orders
pub async fn get_orders(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, AppError> {
    let orders = state.orders.get_user_orders(auth_user.user_id).await?;
    let responses = orders.iter().map(OrderResponse::from).collect();
    Ok(Json(ApiResponse::success(responses)))
}

/// GET /account/trades
pub async fn get_trades(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<ApiResponse<Vec<Trade>>>, AppError> {
    let trades = state
        .orders
        .get_user_trades(auth_user.user_id, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(trades)))
}

/// GET /account/summary
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ApiResponse<AccountSummary>>, AppError> {
    let summary = state.orders.get_account_summary(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(summary)))
}
