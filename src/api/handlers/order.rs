//! Order API Handlers
//!
//! Thin translation layer: authenticate, hand the request to the order
//! book service, map its error taxonomy onto HTTP.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::models::{CreateOrderRequest, OrderResponse, UpdateOrderRequest};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

/// POST /orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let order = state.orders.create_order(auth_user.user_id, req).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(&order))))
}

/// PATCH /orders/:order_id
pub async fn update_order(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let order = state
        .orders
        .update_order(auth_user.user_id, order_id, req)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(&order))))
}

/// DELETE /orders/:order_id
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let order = state
        .orders
        .cancel_order(auth_user.user_id, order_id)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(&order))))
}

/// GET /orders/:order_id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let order = state
        .store
        .fetch_order(order_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch order {}: {}", order_id, e);
            AppError::internal("store unavailable, try again")
        })?
        .filter(|o| o.owner == auth_user.user_id)
        .ok_or_else(|| AppError::not_found("order not found"))?;

    Ok(Json(ApiResponse::success(OrderResponse::from(&order))))
}
