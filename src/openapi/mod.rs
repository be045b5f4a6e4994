use utoipa::OpenApi;

use crate::{
    entities::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::{ErrorKind, ErrorResponse},
    handlers,
    services::{
        orders::{CreateOrderRequest, OrderItemRequest, OrderItemResponse, OrderResponse},
        payment_notifications::{PaymentNotification, ReconcileOutcome},
        payments::{CreatePaymentRequest, PaymentResponse},
        products::ProductResponse,
    },
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Orders, stock and payments for a single storefront.

## Flow

1. `POST /api/v1/orders` takes stock for every line and records the order as `pending`.
2. `POST /api/v1/payments` opens a hosted payment session and returns its token and URL.
3. The gateway reports the outcome to `POST /api/v1/payments/notification`; a settled payment moves the order to `paid`.

## Caller identity

Requests are authenticated upstream. The proxy forwards the caller as
`X-User-Id` and `X-User-Role` (`customer` or `admin`).

## Errors

Every error body has the same shape:

```json
{
  "error": "Unprocessable Entity",
  "code": "insufficient_stock",
  "message": "Insufficient stock for product ...",
  "request_id": "...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
"#
    ),
    paths(
        handlers::orders::create_order,
        handlers::orders::list_my_orders,
        handlers::orders::list_all_orders,
        handlers::orders::get_order,
        handlers::orders::cancel_order,
        handlers::orders::update_order_status,
        handlers::payments::create_payment,
        handlers::payments::list_payments,
        handlers::payments::get_payment,
        handlers::payments::get_order_payment,
        handlers::payment_webhooks::payment_notification,
        handlers::products::get_product,
    ),
    components(schemas(
        ErrorResponse,
        ErrorKind,
        OrderStatus,
        PaymentStatus,
        PaymentMethod,
        CreateOrderRequest,
        OrderItemRequest,
        OrderItemResponse,
        OrderResponse,
        handlers::orders::UpdateOrderStatusRequest,
        CreatePaymentRequest,
        PaymentResponse,
        PaymentNotification,
        ReconcileOutcome,
        ProductResponse,
    )),
    tags(
        (name = "orders", description = "Order placement and lifecycle"),
        (name = "payments", description = "Payment sessions and gateway notifications"),
        (name = "products", description = "Product reads"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_core_routes() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        for path in [
            "/api/v1/orders",
            "/api/v1/orders/{id}/cancel",
            "/api/v1/payments",
            "/api/v1/payments/notification",
            "/api/v1/products/{id}",
        ] {
            assert!(paths.contains_key(path), "missing {}", path);
        }
    }
}
