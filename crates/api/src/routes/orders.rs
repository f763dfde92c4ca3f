//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{CreateOrder, Order, OrderStatus, UpdateOrder};
use order_store::OrderStore;
use saga::OrderStateMachine;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub machine: Arc<OrderStateMachine<S>>,
}

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub success: bool,
    pub message: &'static str,
    pub data: Order,
}

// -- Handlers --

/// POST /orders: validate stock, persist a PENDING order and announce it.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrder>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let order = state.machine.create(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            success: true,
            message: "Order created successfully",
            data: order,
        }),
    ))
}

/// GET /orders: list orders, oldest first, optionally filtered by `?status=`.
#[tracing::instrument(skip(state))]
pub async fn list<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(state.machine.list_orders(status).await?))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id = parse_order_id(&id)?;
    Ok(Json(state.machine.get_order(id).await?))
}

/// PATCH /orders/{id}: change the SKU and/or quantity of an open order.
#[tracing::instrument(skip(state, req))]
pub async fn update<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateOrder>,
) -> Result<Json<Order>, ApiError> {
    let id = parse_order_id(&id)?;
    Ok(Json(state.machine.update(id, req).await?))
}

/// DELETE /orders/{id}: request cancellation and release the reservation.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id = parse_order_id(&id)?;
    Ok(Json(state.machine.cancel_order(id).await?))
}

/// DELETE /orders/{id}/record: delete an open order outright.
#[tracing::instrument(skip(state))]
pub async fn remove<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_order_id(&id)?;
    state.machine.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(OrderId::from(uuid))
}
