use std::sync::Arc;

use crate::{
    config::GatewayConfig,
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        order_status::OrderStatusService, orders::OrderService,
        payment_notifications::NotificationReconciler, payments::PaymentService,
        products::ProductService,
    },
};

pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod products;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub payments: Arc<PaymentService>,
    pub notifications: Arc<NotificationReconciler>,
    pub products: Arc<ProductService>,
}

impl AppServices {
    /// Wires the services against one pool, one event channel and one gateway.
    /// The gateway server key is handed to the reconciler here and nowhere else.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        gateway_config: &GatewayConfig,
    ) -> Self {
        Self {
            orders: Arc::new(OrderService::new(
                db_pool.clone(),
                Some(event_sender.clone()),
            )),
            order_status: Arc::new(OrderStatusService::new(
                db_pool.clone(),
                Some(event_sender.clone()),
            )),
            payments: Arc::new(PaymentService::new(
                db_pool.clone(),
                gateway,
                gateway_config,
                Some(event_sender.clone()),
            )),
            notifications: Arc::new(NotificationReconciler::new(
                db_pool.clone(),
                gateway_config.server_key.clone(),
                Some(event_sender),
            )),
            products: Arc::new(ProductService::new(db_pool)),
        }
    }
}
