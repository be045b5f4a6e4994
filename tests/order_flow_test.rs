mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use storefront_api::{
    auth::AuthenticatedUser,
    entities::{order, OrderStatus},
    errors::ServiceError,
    services::{
        inventory::StockLedger,
        orders::{CreateOrderRequest, OrderItemRequest, OrderItemResponse},
    },
};
use uuid::Uuid;

fn cart(lines: &[(Uuid, i32)]) -> CreateOrderRequest {
    CreateOrderRequest {
        items: lines
            .iter()
            .map(|(product_id, quantity)| OrderItemRequest {
                product_id: *product_id,
                quantity: *quantity,
            })
            .collect(),
        notes: None,
    }
}

async fn order_count(app: &TestApp) -> u64 {
    order::Entity::find().count(&*app.state.db).await.unwrap()
}

#[tokio::test]
async fn concurrent_reductions_never_oversell() {
    let app = TestApp::new().await;
    let product = app.seed_product("Indomie Goreng", dec!(5.50), 7).await;
    let ledger = StockLedger::new(app.state.db.clone());

    let mut tasks = vec![];
    for _ in 0..20 {
        let ledger = ledger.clone();
        let id = product.id;
        tasks.push(tokio::spawn(async move { ledger.reduce(id, 1).await.is_ok() }));
    }

    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 7, "exactly the units on hand can be taken");
    assert_eq!(app.stock_of(product.id).await, 0);
}

#[tokio::test]
async fn concurrent_orders_share_limited_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("Kopi Tubruk", dec!(12.75), 3).await;

    let mut customers = vec![];
    for _ in 0..8 {
        customers.push(app.seed_customer().await);
    }

    let mut tasks = vec![];
    for customer in customers {
        let orders = app.state.services.orders.clone();
        let id = product.id;
        tasks.push(tokio::spawn(async move {
            orders.create_order(customer, cart(&[(id, 1)])).await
        }));
    }

    let mut placed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => placed += 1,
            Err(err) => assert_matches!(err, ServiceError::InsufficientStock { .. }),
        }
    }

    assert_eq!(placed, 3);
    assert_eq!(order_count(&app).await, 3);
    assert_eq!(app.stock_of(product.id).await, 0);
}

#[tokio::test]
async fn order_total_uses_captured_prices() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let tea = app.seed_product("Teh Tarik", dec!(10.50), 10).await;
    let cake = app.seed_product("Kue Lapis", dec!(25.25), 10).await;

    let created = app
        .state
        .services
        .orders
        .create_order(customer, cart(&[(tea.id, 3), (cake.id, 2)]))
        .await
        .unwrap();

    assert_eq!(created.status, OrderStatus::Pending);
    assert_eq!(created.total_amount, dec!(82.00));
    assert!(created.order_number.starts_with("ORD-"));
    assert_eq!(created.items.len(), 2);
    assert_eq!(app.stock_of(tea.id).await, 7);
    assert_eq!(app.stock_of(cake.id).await, 8);

    app.state
        .services
        .products
        .update_price(tea.id, dec!(12.75))
        .await
        .unwrap();

    let reloaded = app
        .state
        .services
        .orders
        .get_order(created.id, &AuthenticatedUser::customer(customer))
        .await
        .unwrap();

    assert_eq!(reloaded.total_amount, dec!(82.00));
    let tea_line = reloaded
        .items
        .iter()
        .find(|item| item.product_id == tea.id)
        .unwrap();
    assert_eq!(tea_line.price, dec!(10.50));
    assert_eq!(tea_line.subtotal, dec!(31.50));
    let line_sum: rust_decimal::Decimal = reloaded.items.iter().map(|i| i.subtotal).sum();
    assert_eq!(line_sum, reloaded.total_amount);
}

#[tokio::test]
async fn empty_cart_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;

    let err = app
        .state
        .services
        .orders
        .create_order(customer, cart(&[]))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::EmptyCart);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn insufficient_stock_leaves_stock_untouched() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let product = app.seed_product("Sambal", dec!(5.50), 2).await;

    let err = app
        .state
        .services
        .orders
        .create_order(customer, cart(&[(product.id, 3)]))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::InsufficientStock { product_id, requested: 3 } if product_id == product.id
    );
    assert_eq!(app.stock_of(product.id).await, 2);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn later_line_failure_rolls_back_earlier_lines() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let plenty = app.seed_product("Beras", dec!(10.50), 5).await;
    let scarce = app.seed_product("Durian", dec!(25.25), 2).await;

    let err = app
        .state
        .services
        .orders
        .create_order(customer, cart(&[(plenty.id, 1), (scarce.id, 3)]))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock { .. });
    assert_eq!(app.stock_of(plenty.id).await, 5);
    assert_eq!(app.stock_of(scarce.id).await, 2);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn unknown_inactive_and_non_positive_lines_are_rejected() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let product = app.seed_product("Tempe", dec!(5.50), 5).await;
    let orders = &app.state.services.orders;

    let missing = Uuid::new_v4();
    assert_matches!(
        orders.create_order(customer, cart(&[(product.id, 1), (missing, 1)])).await,
        Err(ServiceError::ProductNotFound(id)) if id == missing
    );
    assert_matches!(
        orders.create_order(customer, cart(&[(product.id, 0)])).await,
        Err(ServiceError::ValidationError(_))
    );

    app.state
        .services
        .products
        .set_active(product.id, false)
        .await
        .unwrap();
    assert_matches!(
        orders.create_order(customer, cart(&[(product.id, 1)])).await,
        Err(ServiceError::ProductNotAvailable(id)) if id == product.id
    );

    assert_eq!(app.stock_of(product.id).await, 5);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn unknown_customer_cannot_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Tahu", dec!(5.50), 5).await;

    let stranger = Uuid::new_v4();
    assert_matches!(
        app.state
            .services
            .orders
            .create_order(stranger, cart(&[(product.id, 1)]))
            .await,
        Err(ServiceError::UserNotFound(id)) if id == stranger
    );
    assert_eq!(app.stock_of(product.id).await, 5);
}

#[tokio::test]
async fn cancelling_pending_order_restores_stock() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let product = app.seed_product("Rendang", dec!(25.25), 4).await;

    let created = app
        .state
        .services
        .orders
        .create_order(customer, cart(&[(product.id, 3)]))
        .await
        .unwrap();
    assert_eq!(app.stock_of(product.id).await, 1);

    let cancelled = app
        .state
        .services
        .order_status
        .cancel(created.id, customer)
        .await
        .unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(app.stock_of(product.id).await, 4);

    // a second cancel is refused and does not restore stock twice
    assert_matches!(
        app.state.services.order_status.cancel(created.id, customer).await,
        Err(ServiceError::CannotCancelOrder { .. })
    );
    assert_eq!(app.stock_of(product.id).await, 4);
}

#[tokio::test]
async fn paid_orders_can_still_be_cancelled() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let product = app.seed_product("Soto", dec!(12.75), 2).await;

    let created = app
        .state
        .services
        .orders
        .create_order(customer, cart(&[(product.id, 2)]))
        .await
        .unwrap();
    app.state
        .services
        .order_status
        .update_status(created.id, OrderStatus::Paid)
        .await
        .unwrap();

    app.state
        .services
        .order_status
        .cancel(created.id, customer)
        .await
        .unwrap();
    assert_eq!(app.stock_of(product.id).await, 2);
}

#[tokio::test]
async fn delivered_orders_cannot_be_cancelled() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let product = app.seed_product("Gudeg", dec!(10.50), 3).await;

    let created = app
        .state
        .services
        .orders
        .create_order(customer, cart(&[(product.id, 1)]))
        .await
        .unwrap();
    app.state
        .services
        .order_status
        .update_status(created.id, OrderStatus::Delivered)
        .await
        .unwrap();

    let err = app
        .state
        .services
        .order_status
        .cancel(created.id, customer)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::CannotCancelOrder { ref status, .. } if status == "delivered");
    assert_eq!(app.stock_of(product.id).await, 2);
}

#[tokio::test]
async fn only_the_owner_may_cancel() {
    let app = TestApp::new().await;
    let owner = app.seed_customer().await;
    let other = app.seed_customer().await;
    let product = app.seed_product("Bakso", dec!(5.50), 3).await;

    let created = app
        .state
        .services
        .orders
        .create_order(owner, cart(&[(product.id, 1)]))
        .await
        .unwrap();

    assert_matches!(
        app.state.services.order_status.cancel(created.id, other).await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        app.state.services.order_status.cancel(Uuid::new_v4(), owner).await,
        Err(ServiceError::OrderNotFound(_))
    );
    assert_eq!(app.stock_of(product.id).await, 2);
}

#[tokio::test]
async fn status_update_to_paid_stamps_payment_time() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let product = app.seed_product("Martabak", dec!(12.75), 3).await;

    let created = app
        .state
        .services
        .orders
        .create_order(customer, cart(&[(product.id, 1)]))
        .await
        .unwrap();
    assert!(created.paid_at.is_none());

    let paid = app
        .state
        .services
        .order_status
        .update_status(created.id, OrderStatus::Paid)
        .await
        .unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert!(paid.paid_at.is_some());

    // any state may be set from any state
    let back = app
        .state
        .services
        .order_status
        .update_status(created.id, OrderStatus::Pending)
        .await
        .unwrap();
    assert_eq!(back.status, OrderStatus::Pending);
}

#[tokio::test]
async fn order_reads_respect_ownership_and_pagination() {
    let app = TestApp::new().await;
    let owner = app.seed_customer().await;
    let other = app.seed_customer().await;
    let product = app.seed_product("Pempek", dec!(5.50), 10).await;
    let orders = &app.state.services.orders;

    let mut ids = vec![];
    for _ in 0..3 {
        ids.push(
            orders
                .create_order(owner, cart(&[(product.id, 1)]))
                .await
                .unwrap()
                .id,
        );
    }
    orders
        .create_order(other, cart(&[(product.id, 1)]))
        .await
        .unwrap();

    assert_matches!(
        orders.get_order(ids[0], &AuthenticatedUser::customer(other)).await,
        Err(ServiceError::Forbidden(_))
    );
    let admin = AuthenticatedUser::new(Uuid::new_v4(), storefront_api::entities::UserRole::Admin);
    assert_eq!(orders.get_order(ids[0], &admin).await.unwrap().user_id, owner);

    let first_page = orders.list_user_orders(owner, 1, 2).await.unwrap();
    assert_eq!(first_page.total, 3);
    assert_eq!(first_page.items.len(), 2);
    assert!(first_page.items.iter().all(|o| o.user_id == owner));
    assert!(first_page.items.iter().all(|o| o.items.len() == 1));

    let second_page = orders.list_user_orders(owner, 2, 2).await.unwrap();
    assert_eq!(second_page.items.len(), 1);

    let everything = orders.list_orders(1, 10).await.unwrap();
    assert_eq!(everything.total, 4);
}

#[tokio::test]
async fn items_come_back_in_cart_order() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let mut products = vec![];
    for name in ["Tahu Isi", "Bakwan", "Risoles", "Pastel", "Lumpia"] {
        products.push(app.seed_product(name, dec!(5.50), 5).await.id);
    }
    // cart order differs from creation order
    let wanted = vec![products[3], products[0], products[4], products[1], products[2]];
    let lines: Vec<(Uuid, i32)> = wanted.iter().map(|id| (*id, 1)).collect();
    let orders = &app.state.services.orders;

    let created = orders.create_order(customer, cart(&lines)).await.unwrap();
    let ids = |items: &[OrderItemResponse]| {
        items.iter().map(|item| item.product_id).collect::<Vec<_>>()
    };
    assert_eq!(ids(&created.items), wanted);

    let fetched = orders
        .get_order(created.id, &AuthenticatedUser::customer(customer))
        .await
        .unwrap();
    assert_eq!(ids(&fetched.items), wanted);

    let listed = orders.list_user_orders(customer, 1, 10).await.unwrap();
    assert_eq!(ids(&listed.items[0].items), wanted);
}
