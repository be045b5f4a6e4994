use crate::{
    auth::AuthenticatedUser,
    config::GatewayConfig,
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        payment::{self, Entity as PaymentEntity, PaymentMethod, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{ChargeItem, ChargeRequest, CustomerDetails, PaymentGateway},
    services::{checked_page, orders::OrderService, Page},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveValue::Set,
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_number: Option<String>,
    pub amount: Decimal,
    pub payment_method: String,
    pub status: PaymentStatus,
    pub gateway_transaction_id: String,
    /// Token for the hosted payment page widget
    pub snap_token: Option<String>,
    /// Redirect target for the hosted payment page
    pub snap_url: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentResponse {
    fn build(payment: payment::Model, order: Option<&order::Model>) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            order_number: order.map(|o| o.order_number.clone()),
            amount: payment.amount,
            payment_method: payment.payment_method,
            status: payment.status,
            gateway_transaction_id: payment.gateway_transaction_id,
            snap_token: payment.gateway_token,
            snap_url: payment.gateway_redirect_url,
            expired_at: payment.expired_at,
            paid_at: payment.paid_at,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

/// `PAY-<order number>-<unix millis>`; a fresh one is minted for every attempt.
pub fn gateway_transaction_id(order_number: &str, now: DateTime<Utc>) -> String {
    format!("PAY-{}-{}", order_number, now.timestamp_millis())
}

/// Opens gateway payment sessions for pending orders and serves payment reads
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    gateway_timeout: Duration,
    intent_expiry: ChronoDuration,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        gateway_config: &GatewayConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            gateway_timeout: gateway_config.timeout(),
            intent_expiry: ChronoDuration::hours(gateway_config.intent_expiry_hours),
            event_sender,
        }
    }

    /// Opens (or reopens) the payment session for an order.
    ///
    /// There is at most one payment row per order. Retrying before the order is
    /// paid replaces the previous attempt's transaction id, token and expiry;
    /// once a payment has succeeded further attempts are refused.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, method = %request.payment_method))]
    pub async fn create_payment(
        &self,
        user_id: Uuid,
        request: CreatePaymentRequest,
    ) -> Result<PaymentResponse, ServiceError> {
        let db = &*self.db_pool;
        let details = OrderService::load_order_details(db, request.order_id).await?;
        let order = &details.order;

        if order.user_id != user_id {
            warn!(order_id = %order.id, "Payment refused: caller does not own the order");
            return Err(ServiceError::Forbidden(
                "only the order owner can pay for it".to_string(),
            ));
        }
        if !order.status.is_awaiting_payment() {
            return Err(ServiceError::OrderAlreadyPaid(order.id));
        }

        let existing = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(db)
            .await?;
        if existing.map(|p| p.status.is_terminal()).unwrap_or(false) {
            return Err(ServiceError::PaymentAlreadyExists(order.id));
        }

        let now = Utc::now();
        let transaction_id = gateway_transaction_id(&order.order_number, now);
        let charge = ChargeRequest {
            transaction_id: transaction_id.clone(),
            gross_amount: order.total_amount,
            customer: CustomerDetails {
                name: details.user.name.clone(),
                email: details.user.email.clone(),
                phone: details.user.phone.clone(),
            },
            items: details
                .lines
                .iter()
                .map(|line| ChargeItem {
                    id: line.item.product_id.to_string(),
                    name: line
                        .product
                        .as_ref()
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| line.item.product_id.to_string()),
                    price: line.item.price,
                    quantity: line.item.quantity,
                })
                .collect(),
        };

        // No retry here: a timed-out intent may still have been created upstream.
        let call = self.gateway.create_intent(&charge);
        let intent = match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(result) => result.map_err(|e| {
                error!(error = %e, transaction_id = %transaction_id, "Gateway refused payment intent");
                ServiceError::from(e)
            })?,
            Err(_) => {
                error!(transaction_id = %transaction_id, "Gateway call timed out");
                return Err(ServiceError::GatewayTimeout(self.gateway_timeout.as_secs()));
            }
        };

        if intent.charged_amount != order.total_amount {
            info!(
                order_id = %order.id,
                total = %order.total_amount,
                charged = %intent.charged_amount,
                "Gateway charges a rounded amount"
            );
        }

        // The payment records what the customer is actually asked to pay.
        let expired_at = now + self.intent_expiry;
        let row = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            amount: Set(intent.charged_amount),
            payment_method: Set(request.payment_method.to_string()),
            status: Set(PaymentStatus::Pending),
            gateway_transaction_id: Set(transaction_id.clone()),
            gateway_token: Set(Some(intent.token)),
            gateway_redirect_url: Set(Some(intent.redirect_url)),
            paid_at: Set(None),
            expired_at: Set(Some(expired_at)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let affected = PaymentEntity::insert(row)
            .on_conflict(
                OnConflict::column(payment::Column::OrderId)
                    .update_columns([
                        payment::Column::Amount,
                        payment::Column::PaymentMethod,
                        payment::Column::Status,
                        payment::Column::GatewayTransactionId,
                        payment::Column::GatewayToken,
                        payment::Column::GatewayRedirectUrl,
                        payment::Column::ExpiredAt,
                        payment::Column::UpdatedAt,
                    ])
                    .action_and_where(
                        Expr::col((PaymentEntity, payment::Column::Status))
                            .ne(PaymentStatus::Success.to_string()),
                    )
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order.id, "Failed to store payment intent");
                ServiceError::DatabaseError(e)
            })?;

        if affected == 0 {
            // A settlement landed between our check and the upsert.
            warn!(order_id = %order.id, "Payment succeeded concurrently; discarding new intent");
            return Err(ServiceError::PaymentAlreadyExists(order.id));
        }

        let stored = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(transaction_id.clone()))?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to commit payment intent");
            ServiceError::DatabaseError(e)
        })?;

        counter!("storefront_payments.intents_created", 1);
        info!(
            order_id = %order.id,
            payment_id = %stored.id,
            transaction_id = %transaction_id,
            "Payment intent created"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::PaymentIntentCreated {
                    order_id: order.id,
                    gateway_transaction_id: transaction_id,
                })
                .await;
        }

        Ok(PaymentResponse::build(stored, Some(order)))
    }

    #[instrument(skip(self, caller), fields(caller_id = %caller.user_id))]
    pub async fn get_payment(
        &self,
        payment_id: Uuid,
        caller: &AuthenticatedUser,
    ) -> Result<PaymentResponse, ServiceError> {
        let (payment, order) = PaymentEntity::find_by_id(payment_id)
            .find_also_related(OrderEntity)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(payment_id.to_string()))?;

        Self::authorize(caller, order.as_ref())?;
        Ok(PaymentResponse::build(payment, order.as_ref()))
    }

    #[instrument(skip(self, caller), fields(caller_id = %caller.user_id))]
    pub async fn get_payment_by_order(
        &self,
        order_id: Uuid,
        caller: &AuthenticatedUser,
    ) -> Result<PaymentResponse, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;
        caller.ensure_can_access(order.user_id)?;

        let payment = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(format!("order {}", order_id)))?;

        Ok(PaymentResponse::build(payment, Some(&order)))
    }

    /// All payments, newest first.
    #[instrument(skip(self))]
    pub async fn list_payments(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<Page<PaymentResponse>, ServiceError> {
        let (page, per_page) = checked_page(page, per_page)?;
        let paginator = PaymentEntity::find()
            .order_by_desc(payment::Column::CreatedAt)
            .find_also_related(OrderEntity)
            .paginate(&*self.db_pool, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count payments");
            ServiceError::DatabaseError(e)
        })?;
        let items = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(|(payment, order)| PaymentResponse::build(payment, order.as_ref()))
            .collect();

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    fn authorize(
        caller: &AuthenticatedUser,
        order: Option<&order::Model>,
    ) -> Result<(), ServiceError> {
        match order {
            Some(order) => caller.ensure_can_access(order.user_id),
            // Orphaned rows are visible to admins only.
            None => caller.require_admin(),
        }
    }
}
