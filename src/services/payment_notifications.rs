use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        payment::{self, Entity as PaymentEntity, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::signature::verify_signature,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Asynchronous status report pushed by the gateway.
///
/// `order_id` is the gateway-facing transaction id we minted, not our order id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PaymentNotification {
    #[serde(default)]
    pub transaction_status: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub status_code: String,
    #[serde(default)]
    pub gross_amount: String,
    #[serde(default)]
    pub payment_type: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub fraud_status: String,
    #[serde(default)]
    pub signature_key: String,
}

/// What a notification did to our records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "result", content = "status")]
pub enum ReconcileOutcome {
    /// The payment moved to this status
    Applied(PaymentStatus),
    /// The payment already had this outcome, or had already succeeded
    Unchanged,
    /// The gateway reported something we do not act on
    Ignored,
}

/// Maps a gateway status onto ours. `None` means leave the payment alone.
pub fn target_status(transaction_status: &str, fraud_status: &str) -> Option<PaymentStatus> {
    match transaction_status {
        // Any other fraud verdict ("challenge", "deny") waits for a follow-up notification
        "capture" | "settlement" => match fraud_status {
            "" | "accept" => Some(PaymentStatus::Success),
            _ => None,
        },
        "pending" => Some(PaymentStatus::Pending),
        "deny" | "cancel" => Some(PaymentStatus::Failed),
        "expire" => Some(PaymentStatus::Expired),
        _ => None,
    }
}

/// Applies gateway notifications to payments and their orders
#[derive(Clone)]
pub struct NotificationReconciler {
    db_pool: Arc<DbPool>,
    server_key: String,
    event_sender: Option<Arc<EventSender>>,
}

impl NotificationReconciler {
    pub fn new(
        db_pool: Arc<DbPool>,
        server_key: impl Into<String>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            server_key: server_key.into(),
            event_sender,
        }
    }

    /// Verifies and applies one notification.
    ///
    /// Safe to call any number of times with the same payload: a payment that
    /// already succeeded is never touched again, and the order is only moved
    /// to `paid` from `pending`.
    #[instrument(
        skip(self, notification),
        fields(
            transaction = %notification.order_id,
            status = %notification.transaction_status,
        )
    )]
    pub async fn handle_notification(
        &self,
        notification: PaymentNotification,
    ) -> Result<ReconcileOutcome, ServiceError> {
        counter!("storefront_payments.notifications", 1);

        let payment = PaymentEntity::find()
            .filter(payment::Column::GatewayTransactionId.eq(notification.order_id.as_str()))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(notification.order_id.clone()))?;

        if !verify_signature(
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
            &self.server_key,
            &notification.signature_key,
        ) {
            counter!("storefront_payments.invalid_signatures", 1);
            warn!(payment_id = %payment.id, "Rejected notification with bad signature");
            return Err(ServiceError::InvalidSignature);
        }

        let Some(target) = target_status(&notification.transaction_status, &notification.fraud_status)
        else {
            warn!(
                payment_id = %payment.id,
                transaction_status = %notification.transaction_status,
                fraud_status = %notification.fraud_status,
                "Unhandled notification status; leaving payment as is"
            );
            return Ok(ReconcileOutcome::Ignored);
        };

        self.apply(payment.id, &notification, target).await
    }

    /// Moves the payment to `target` under a row lock, provided it still belongs
    /// to the notified transaction.
    async fn apply(
        &self,
        payment_id: Uuid,
        notification: &PaymentNotification,
        target: PaymentStatus,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        // Re-read under lock; a concurrent notification may have won, or a new
        // intent may have replaced the transaction this notification is about.
        let payment = PaymentEntity::find_by_id(payment_id)
            .filter(payment::Column::GatewayTransactionId.eq(notification.order_id.as_str()))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(notification.order_id.clone()))?;

        if payment.status.is_terminal() || payment.status == target {
            info!(
                payment_id = %payment.id,
                current = %payment.status,
                reported = %target,
                "Notification changes nothing"
            );
            return Ok(ReconcileOutcome::Unchanged);
        }

        let now = Utc::now();
        let order_id = payment.order_id;
        let previous = payment.status;

        let mut active = payment.into_active_model();
        active.status = Set(target);
        if target == PaymentStatus::Success {
            active.paid_at = Set(Some(now));
            if !notification.payment_type.is_empty() {
                active.payment_method = Set(notification.payment_type.clone());
            }
        }
        active.update(&txn).await.map_err(|e| {
            error!(error = %e, payment_id = %payment_id, "Failed to update payment");
            ServiceError::DatabaseError(e)
        })?;

        if target == PaymentStatus::Success {
            Self::mark_order_paid(&txn, order_id, now).await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, payment_id = %payment_id, "Failed to commit notification");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            payment_id = %payment_id,
            order_id = %order_id,
            from = %previous,
            to = %target,
            "Payment reconciled"
        );

        let event = match target {
            PaymentStatus::Success => Some(Event::PaymentSucceeded { order_id, payment_id }),
            PaymentStatus::Failed | PaymentStatus::Cancelled => {
                Some(Event::PaymentFailed { order_id, payment_id })
            }
            PaymentStatus::Expired => Some(Event::PaymentExpired { order_id, payment_id }),
            PaymentStatus::Pending => None,
        };
        if let (Some(sender), Some(event)) = (&self.event_sender, event) {
            sender.send_or_log(event).await;
        }

        Ok(ReconcileOutcome::Applied(target))
    }

    async fn mark_order_paid(
        txn: &sea_orm::DatabaseTransaction,
        order_id: Uuid,
        paid_at: chrono::DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let Some(order) = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(txn)
            .await?
        else {
            warn!(order_id = %order_id, "Settled payment refers to a missing order");
            return Ok(());
        };

        match order.status {
            OrderStatus::Pending => {
                let mut active: order::ActiveModel = order.into();
                active.status = Set(OrderStatus::Paid);
                active.paid_at = Set(Some(paid_at));
                active.update(txn).await.map_err(|e| {
                    error!(error = %e, order_id = %order_id, "Failed to mark order paid");
                    ServiceError::DatabaseError(e)
                })?;
            }
            OrderStatus::Cancelled => {
                // Money arrived for a cancelled order; needs a manual refund.
                warn!(order_id = %order_id, "Payment settled for a cancelled order");
            }
            other => {
                info!(order_id = %order_id, status = %other, "Order already past pending");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{establish_connection_with_config, run_migrations, DbConfig},
        entities::{user, UserRole},
        services::{
            orders::{CreateOrderRequest, OrderItemRequest, OrderService},
            products::{CreateProductRequest, ProductService},
        },
    };
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    async fn pending_payment(transaction_id: &str) -> (NotificationReconciler, Arc<DbPool>, Uuid) {
        let db = establish_connection_with_config(&DbConfig::new("sqlite::memory:"))
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        let db = Arc::new(db);

        let user = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set("dewi@example.com".into()),
            name: Set("Dewi".into()),
            role: Set(UserRole::Customer),
            ..Default::default()
        }
        .insert(&*db)
        .await
        .unwrap();

        let product = ProductService::new(db.clone())
            .create_product(CreateProductRequest {
                name: "Martabak".into(),
                description: None,
                sku: "MTB-1".into(),
                price: dec!(10.50),
                stock: 5,
                is_active: true,
                category_id: None,
            })
            .await
            .unwrap();

        let order = OrderService::new(db.clone(), None)
            .create_order(
                user.id,
                CreateOrderRequest {
                    items: vec![OrderItemRequest {
                        product_id: product.id,
                        quantity: 1,
                    }],
                    notes: None,
                },
            )
            .await
            .unwrap();

        let now = Utc::now();
        let payment_id = Uuid::new_v4();
        payment::ActiveModel {
            id: Set(payment_id),
            order_id: Set(order.id),
            amount: Set(order.total_amount),
            payment_method: Set("gopay".into()),
            status: Set(PaymentStatus::Pending),
            gateway_transaction_id: Set(transaction_id.to_string()),
            gateway_token: Set(None),
            gateway_redirect_url: Set(None),
            paid_at: Set(None),
            expired_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*db)
        .await
        .unwrap();

        (NotificationReconciler::new(db.clone(), "key", None), db, payment_id)
    }

    fn report(transaction_id: &str, status: &str) -> PaymentNotification {
        PaymentNotification {
            transaction_status: status.into(),
            order_id: transaction_id.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn report_for_replaced_transaction_is_not_applied() {
        let (reconciler, db, payment_id) = pending_payment("PAY-ORD-1-100").await;

        // A new intent lands after the report was matched but before it is applied.
        let mut replaced: payment::ActiveModel = PaymentEntity::find_by_id(payment_id)
            .one(&*db)
            .await
            .unwrap()
            .unwrap()
            .into();
        replaced.gateway_transaction_id = Set("PAY-ORD-1-200".into());
        replaced.update(&*db).await.unwrap();

        let result = reconciler
            .apply(payment_id, &report("PAY-ORD-1-100", "expire"), PaymentStatus::Expired)
            .await;
        assert_matches!(result, Err(ServiceError::PaymentNotFound(tx)) if tx == "PAY-ORD-1-100");

        let stored = PaymentEntity::find_by_id(payment_id)
            .one(&*db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(stored.gateway_transaction_id, "PAY-ORD-1-200");

        let applied = reconciler
            .apply(payment_id, &report("PAY-ORD-1-200", "expire"), PaymentStatus::Expired)
            .await
            .unwrap();
        assert_eq!(applied, ReconcileOutcome::Applied(PaymentStatus::Expired));
    }

    #[rstest]
    #[case("settlement", "", Some(PaymentStatus::Success))]
    #[case("capture", "accept", Some(PaymentStatus::Success))]
    #[case("capture", "challenge", None)]
    #[case("capture", "deny", None)]
    #[case("settlement", "deny", None)]
    #[case("pending", "", Some(PaymentStatus::Pending))]
    #[case("deny", "", Some(PaymentStatus::Failed))]
    #[case("cancel", "", Some(PaymentStatus::Failed))]
    #[case("expire", "", Some(PaymentStatus::Expired))]
    #[case("refund", "", None)]
    #[case("", "", None)]
    fn maps_gateway_statuses(
        #[case] transaction_status: &str,
        #[case] fraud_status: &str,
        #[case] expected: Option<PaymentStatus>,
    ) {
        assert_eq!(target_status(transaction_status, fraud_status), expected);
    }

    #[test]
    fn notification_tolerates_missing_fields() {
        let parsed: PaymentNotification = serde_json::from_str(
            r#"{"transaction_status":"settlement","order_id":"PAY-1","status_code":"200"}"#,
        )
        .unwrap();
        assert_eq!(parsed.transaction_status, "settlement");
        assert!(parsed.fraud_status.is_empty());
        assert!(parsed.signature_key.is_empty());
    }

    #[test]
    fn outcome_serializes_with_status() {
        let json = serde_json::to_value(ReconcileOutcome::Applied(PaymentStatus::Success)).unwrap();
        assert_eq!(json["result"], "applied");
        assert_eq!(json["status"], "success");
        let json = serde_json::to_value(ReconcileOutcome::Ignored).unwrap();
        assert_eq!(json["result"], "ignored");
    }
}
