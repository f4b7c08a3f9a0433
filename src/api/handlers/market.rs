//! Public market data handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{ContractId, Trade};
use crate::services::orders::{ContractDepth, ContractMarketData};
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

/// GET /markets
pub async fn list_markets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ContractMarketData>>>, AppError> {
    let markets = state.orders.get_market_data().await?;
    Ok(Json(ApiResponse::success(markets)))
}

/// GET /markets/:contract/book
pub async fn get_contract_book(
    State(state): State<Arc<AppState>>,
    Path(contract): Path<String>,
) -> Result<Json<ApiResponse<ContractMarketData>>, AppError> {
    let contract = ContractId::parse(&contract)
        .ok_or_else(|| AppError::bad_request("malformed contract identifier"))?;
    let book = state.orders.get_contract_market_data(&contract).await?;
    Ok(Json(ApiResponse::success(book)))
}

/// GET /markets/:contract/depth
pub async fn get_contract_depth(
    State(state): State<Arc<AppState>>,
    Path(contract): Path<String>,
) -> Result<Json<ApiResponse<ContractDepth>>, AppError> {
    let contract = ContractId::parse(&contract)
        .ok_or_else(|| AppError::bad_request("malformed contract identifier"))?;
    let depth = state.orders.get_contract_depth(&contract).await?;
    Ok(Json(ApiResponse::success(depth)))
}

/// GET /markets/trades
pub async fn get_recent_trades(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<ApiResponse<Vec<Trade>>>, AppError> {
    let trades = state.orders.get_recent_trades(query.limit).await?;
    Ok(Json(ApiResponse::success(trades)))
}
