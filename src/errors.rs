use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint on failure
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "code": "not_found",
    "message": "Order 550e8400-e29b-41d4-a716-446655440000 not found",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable error category
    pub code: ErrorKind,
    /// Human-readable error description
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

/// Coarse error categories that callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Unauthorized,
    InvalidState,
    InsufficientStock,
    AlreadyExists,
    ExternalService,
    InvalidSignature,
    Validation,
    Internal,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product {0} is not available")]
    ProductNotAvailable(Uuid),

    #[error("Insufficient stock for product {product_id}: requested {requested}")]
    InsufficientStock { product_id: Uuid, requested: i32 },

    #[error("Order {0} is not awaiting payment")]
    OrderAlreadyPaid(Uuid),

    #[error("Order {order_id} cannot be cancelled in status {status}")]
    CannotCancelOrder { order_id: Uuid, status: String },

    #[error("Payment for order {0} already succeeded")]
    PaymentAlreadyExists(Uuid),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Payment gateway did not respond within {0} seconds")]
    GatewayTimeout(u64),

    #[error("Invalid notification signature")]
    InvalidSignature,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OrderNotFound(_)
            | Self::ProductNotFound(_)
            | Self::PaymentNotFound(_)
            | Self::UserNotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::EmptyCart
            | Self::ProductNotAvailable(_)
            | Self::OrderAlreadyPaid(_)
            | Self::CannotCancelOrder { .. } => ErrorKind::InvalidState,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::PaymentAlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::ExternalServiceError(_) | Self::GatewayTimeout(_) => ErrorKind::ExternalService,
            Self::InvalidSignature => ErrorKind::InvalidSignature,
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::DatabaseError(_) | Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayTimeout(_))
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart => StatusCode::BAD_REQUEST,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => match self.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::Unauthorized | ErrorKind::InvalidSignature => StatusCode::UNAUTHORIZED,
                ErrorKind::InvalidState | ErrorKind::AlreadyExists => StatusCode::CONFLICT,
                ErrorKind::InsufficientStock => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::ExternalService => StatusCode::BAD_GATEWAY,
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ExternalServiceError(_) => "Payment gateway error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.kind(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
