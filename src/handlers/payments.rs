use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::{
        payments::{CreatePaymentRequest, PaymentResponse},
        Page, PageRequest,
    },
    ApiResponse, ApiResult, AppState,
};

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_payment).get(list_payments))
        .route("/:id", get(get_payment))
        .route("/order/:order_id", get(get_order_payment))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments",
    summary = "Create payment",
    description = "Open a hosted payment session for a pending order. Retrying replaces the previous session.",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment session created", body = ApiResponse<PaymentResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway error", body = crate::errors::ErrorResponse),
        (status = 504, description = "Gateway timeout", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentResponse>>), ServiceError> {
    let payment = state
        .services
        .payments
        .create_payment(user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments",
    summary = "List payments",
    description = "All payments, newest first. Admin only.",
    params(PageRequest),
    responses(
        (status = 200, description = "Payments retrieved", body = ApiResponse<Page<PaymentResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<PaymentResponse>> {
    user.require_admin()?;
    let (page, limit) = page.normalized(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let payments = state.services.payments.list_payments(page, limit).await?;
    Ok(Json(ApiResponse::success(payments)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    summary = "Get payment",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment retrieved", body = ApiResponse<PaymentResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentResponse> {
    let payment = state.services.payments.get_payment(id, &user).await?;
    Ok(Json(ApiResponse::success(payment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/order/{order_id}",
    summary = "Get payment for order",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment retrieved", body = ApiResponse<PaymentResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order or payment not found", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn get_order_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentResponse> {
    let payment = state
        .services
        .payments
        .get_payment_by_order(order_id, &user)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}
