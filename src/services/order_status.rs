use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QuerySelect,
    TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order::{
            ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
            OrderStatus,
        },
        order_item::{self, Entity as OrderItemEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory::StockLedger,
};

/// Drives orders through their lifecycle
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Cancels an order on behalf of its owner and puts every line's stock back.
    ///
    /// Lines whose product has since been deleted are skipped; the cancellation
    /// itself still goes through.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        requester_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if order.user_id != requester_id {
            warn!(order_id = %order_id, "Cancellation refused: requester does not own the order");
            return Err(ServiceError::Forbidden(
                "only the order owner can cancel it".to_string(),
            ));
        }

        if !order.status.can_be_cancelled() {
            return Err(ServiceError::CannotCancelOrder {
                order_id,
                status: order.status.to_string(),
            });
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        for item in &items {
            let restored = StockLedger::increase_with(&txn, item.product_id, item.quantity).await?;
            if !restored {
                warn!(
                    order_id = %order_id,
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    "Product missing while restoring stock; skipping line"
                );
            }
        }

        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to cancel order");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit cancellation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, lines = items.len(), "Order cancelled and stock restored");

        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::OrderCancelled(order_id)).await;
        }

        Ok(updated)
    }

    /// Sets any status on any order. Callers must already be authorized as admin.
    ///
    /// Stamps `paid_at` when the target status is `paid`.
    #[instrument(skip(self), fields(new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let old_status = order.status;

        let mut active: OrderActiveModel = order.into();
        active.status = Set(new_status);
        if new_status == OrderStatus::Paid {
            active.paid_at = Set(Some(Utc::now()));
        }

        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to update order status");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit status update");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %new_status,
            "Order status updated"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: new_status.to_string(),
                })
                .await;
        }

        Ok(updated)
    }
}
