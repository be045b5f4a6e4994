//! Payment gateway boundary.
//!
//! The rest of the crate talks to the gateway only through [`PaymentGateway`],
//! so services can be exercised against a scripted implementation.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::errors::ServiceError;

pub mod midtrans;
pub mod signature;

pub use midtrans::MidtransGateway;

/// One line of the hosted-payment-page basket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeItem {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerDetails {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Everything the gateway needs to open a payment session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeRequest {
    /// Our transaction id; the gateway echoes it back as `order_id` in notifications
    pub transaction_id: String,
    pub gross_amount: Decimal,
    pub customer: CustomerDetails,
    pub items: Vec<ChargeItem>,
}

/// Handle returned by the gateway for a freshly opened payment session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub token: String,
    pub redirect_url: String,
    /// Amount the session was opened for, after any gateway-side rounding
    pub charged_amount: Decimal,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("gateway did not answer within {after_secs} seconds")]
    Timeout { after_secs: u64 },

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout { after_secs } => ServiceError::GatewayTimeout(after_secs),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment session. Implementations must not retry on their own.
    async fn create_intent(&self, request: &ChargeRequest) -> Result<PaymentIntent, GatewayError>;
}
