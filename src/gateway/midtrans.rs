use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::{ChargeRequest, GatewayError, PaymentGateway, PaymentIntent};
use crate::config::GatewayConfig;

const SNAP_TRANSACTIONS_PATH: &str = "/snap/v1/transactions";
const MAX_ERROR_BODY: usize = 512;

/// Snap (hosted payment page) client
#[derive(Clone)]
pub struct MidtransGateway {
    http: Client,
    base_url: String,
    server_key: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SnapRequest<'a> {
    transaction_details: TransactionDetails<'a>,
    customer_details: SnapCustomer<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_details: Option<Vec<SnapItem<'a>>>,
}

#[derive(Debug, Serialize)]
struct TransactionDetails<'a> {
    order_id: &'a str,
    gross_amount: i64,
}

#[derive(Debug, Serialize)]
struct SnapCustomer<'a> {
    first_name: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SnapItem<'a> {
    id: &'a str,
    name: &'a str,
    price: i64,
    quantity: i32,
}

#[derive(Debug, Deserialize)]
struct SnapResponse {
    token: String,
    redirect_url: String,
}

/// Snap only takes whole currency units.
fn whole_units(amount: Decimal) -> Option<i64> {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Cuts `text` to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_on_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let cut = (0..=max)
        .rev()
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(0);
    text.truncate(cut);
}

impl MidtransGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        info!(
            environment = %config.environment,
            base_url = %config.base_url(),
            "Payment gateway client initialized"
        );

        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            server_key: config.server_key.clone(),
            timeout: config.timeout(),
        })
    }

    fn build_body<'a>(&self, request: &'a ChargeRequest) -> Result<SnapRequest<'a>, GatewayError> {
        let gross_amount = whole_units(request.gross_amount).ok_or_else(|| {
            GatewayError::InvalidResponse(format!(
                "gross amount {} is out of range",
                request.gross_amount
            ))
        })?;

        let mut items = Vec::with_capacity(request.items.len());
        let mut items_total: i64 = 0;
        for item in &request.items {
            let price = whole_units(item.price).ok_or_else(|| {
                GatewayError::InvalidResponse(format!("item price {} is out of range", item.price))
            })?;
            items_total = items_total.saturating_add(price.saturating_mul(item.quantity as i64));
            items.push(SnapItem {
                id: &item.id,
                name: &item.name,
                price,
                quantity: item.quantity,
            });
        }

        // Snap rejects baskets whose lines do not add up to the gross amount.
        let item_details = if items.is_empty() || items_total != gross_amount {
            if !items.is_empty() {
                warn!(
                    transaction_id = %request.transaction_id,
                    gross_amount,
                    items_total,
                    "Rounded item lines do not match gross amount; sending without item details"
                );
            }
            None
        } else {
            Some(items)
        };

        Ok(SnapRequest {
            transaction_details: TransactionDetails {
                order_id: &request.transaction_id,
                gross_amount,
            },
            customer_details: SnapCustomer {
                first_name: &request.customer.name,
                email: &request.customer.email,
                phone: request.customer.phone.as_deref(),
            },
            item_details,
        })
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MidtransGateway {
    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    async fn create_intent(&self, request: &ChargeRequest) -> Result<PaymentIntent, GatewayError> {
        let body = self.build_body(request)?;
        let charged_amount = Decimal::from(body.transaction_details.gross_amount);
        let url = format!("{}{}", self.base_url, SNAP_TRANSACTIONS_PATH);

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.server_key, Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout {
                        after_secs: self.timeout.as_secs(),
                    }
                } else {
                    error!(error = %e, "Payment gateway request failed");
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            truncate_on_char_boundary(&mut text, MAX_ERROR_BODY);
            error!(status = status.as_u16(), body = %text, "Payment gateway rejected request");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let snap: SnapResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        info!(token = %snap.token, "Payment intent created");

        Ok(PaymentIntent {
            token: snap.token,
            redirect_url: snap.redirect_url,
            charged_amount,
        })
    }
}
