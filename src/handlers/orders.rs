use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    cache::{self, keys},
    entities::OrderStatus,
    errors::ServiceError,
    services::{
        orders::{CreateOrderRequest, OrderResponse},
        Page, PageRequest,
    },
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// One of `pending`, `paid`, `processing`, `shipped`, `delivered`, `cancelled`
    pub status: String,
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_my_orders))
        .route("/all", get(list_all_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/status", put(update_order_status))
}

/// Product reads are cached; any stock change makes those entries stale.
async fn invalidate_products(state: &AppState, order: &OrderResponse) {
    let product_keys: Vec<String> = order
        .items
        .iter()
        .map(|item| keys::product(item.product_id))
        .collect();
    cache::invalidate(state.cache.as_ref(), product_keys).await;
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Create an order from cart lines, taking stock for every line or none",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created successfully", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Empty cart or invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Product not available", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state
        .services
        .orders
        .create_order(user.user_id, payload)
        .await?;

    invalidate_products(&state, &order).await;
    info!(order_id = %order.id, order_number = %order.order_number, "Order created");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List my orders",
    description = "Orders placed by the caller, newest first",
    params(PageRequest),
    responses(
        (status = 200, description = "Orders retrieved successfully", body = ApiResponse<Page<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<OrderResponse>> {
    let (page, limit) = page.normalized(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let orders = state
        .services
        .orders
        .list_user_orders(user.user_id, page, limit)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/all",
    summary = "List all orders",
    description = "Every order in the system, newest first. Admin only.",
    params(PageRequest),
    responses(
        (status = 200, description = "Orders retrieved successfully", body = ApiResponse<Page<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<OrderResponse>> {
    user.require_admin()?;
    let (page, limit) = page.normalized(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let orders = state.services.orders.list_orders(page, limit).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.get_order(id, &user).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Cancel a pending or paid order and return its stock",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    state
        .services
        .order_status
        .cancel(id, user.user_id)
        .await?;

    let order = state.services.orders.get_order(id, &user).await?;
    invalidate_products(&state, &order).await;

    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Set order status",
    description = "Move an order to any status. Admin only.",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderResponse> {
    user.require_admin()?;

    let status = OrderStatus::from_str(payload.status.trim()).map_err(|_| {
        ServiceError::ValidationError(format!("unknown order status: {}", payload.status))
    })?;

    state
        .services
        .order_status
        .update_status(id, status)
        .await?;

    let order = state.services.orders.get_order(id, &user).await?;
    Ok(Json(ApiResponse::success(order)))
}
