use axum::{extract::State, response::Json};
use tracing::{info, warn};

use crate::{
    services::payment_notifications::{PaymentNotification, ReconcileOutcome},
    ApiResponse, ApiResult, AppState,
};

// POST /api/v1/payments/notification
//
// No caller identity: the gateway authenticates through the payload signature.
// Every failure is answered with a non-2xx status so the gateway redelivers.
#[utoipa::path(
    post,
    path = "/api/v1/payments/notification",
    request_body = PaymentNotification,
    responses(
        (status = 200, description = "Notification processed", body = ApiResponse<ReconcileOutcome>),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown transaction", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_notification(
    State(state): State<AppState>,
    Json(notification): Json<PaymentNotification>,
) -> ApiResult<ReconcileOutcome> {
    let transaction = notification.order_id.clone();

    match state
        .services
        .notifications
        .handle_notification(notification)
        .await
    {
        Ok(outcome) => {
            info!(transaction = %transaction, ?outcome, "Payment notification handled");
            Ok(Json(ApiResponse::success(outcome)))
        }
        Err(e) => {
            warn!(transaction = %transaction, error = %e, "Payment notification failed");
            Err(e)
        }
    }
}
