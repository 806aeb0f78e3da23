//! HTTP order routes.
//!
//! Mutations go through the notifying decorator, so every successful
//! create or update reaches connected sessions.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use roomservice_core::{NewOrder, Order, OrderError, OrderId, OrderPatch};

use crate::errors::ApiError;
use crate::server::AppState;

/// POST /api/orders
pub async fn create_order(
    State(state): State<AppState>,
    body: Result<Json<NewOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(new) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let order = state.orders.create_order(new).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// PATCH /api/orders/{id}/status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<OrderPatch>, JsonRejection>,
) -> Result<Json<Order>, ApiError> {
    let Json(patch) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let id = OrderId::from(id);
    match state.orders.update_order_status(&id, patch).await? {
        Some(order) => Ok(Json(order)),
        None => Err(OrderError::NotFound(id).into()),
    }
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id = OrderId::from(id);
    state
        .orders
        .get_order(&id)
        .await
        .map(Json)
        .ok_or_else(|| OrderError::NotFound(id).into())
}
