use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted after a state change has been committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
    },
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentIntentCreated {
        order_id: Uuid,
        gateway_transaction_id: String,
    },
    PaymentSucceeded {
        order_id: Uuid,
        payment_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
        payment_id: Uuid,
    },
    PaymentExpired {
        order_id: Uuid,
        payment_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderCancelled(_) => "order_cancelled",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::PaymentIntentCreated { .. } => "payment_intent_created",
            Event::PaymentSucceeded { .. } => "payment_succeeded",
            Event::PaymentFailed { .. } => "payment_failed",
            Event::PaymentExpired { .. } => "payment_expired",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("storefront_events.processed", 1, "event" => event.name());

        match &event {
            Event::OrderCreated {
                order_id,
                user_id,
                total_amount,
            } => info!(%order_id, %user_id, %total_amount, "Order created"),
            Event::OrderCancelled(order_id) => info!(%order_id, "Order cancelled"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, old_status, new_status, "Order status changed"),
            Event::PaymentIntentCreated {
                order_id,
                gateway_transaction_id,
            } => info!(%order_id, gateway_transaction_id, "Payment intent created"),
            Event::PaymentSucceeded {
                order_id,
                payment_id,
            } => info!(%order_id, %payment_id, "Payment succeeded"),
            Event::PaymentFailed {
                order_id,
                payment_id,
            } => warn!(%order_id, %payment_id, "Payment failed"),
            Event::PaymentExpired {
                order_id,
                payment_id,
            } => warn!(%order_id, %payment_id, "Payment expired"),
        }
    }

    info!("Event processing loop stopped");
}
