use crate::{
    auth::AuthenticatedUser,
    db::DbPool,
    entities::{
        order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderStatus},
        order_item::{self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity},
        product::{self, Entity as ProductEntity},
        user::{self, Entity as UserEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{checked_page, inventory::StockLedger, Page},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// One requested line of a new order
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An order line together with the product it refers to, if that still exists
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub item: order_item::Model,
    pub product: Option<product::Model>,
}

/// Order with its owner and lines, loaded through explicit queries
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: order::Model,
    pub user: user::Model,
    pub lines: Vec<OrderLine>,
}

impl OrderDetails {
    pub fn into_response(self) -> OrderResponse {
        let items = self
            .lines
            .into_iter()
            .map(|line| OrderItemResponse {
                id: line.item.id,
                product_id: line.item.product_id,
                product_name: line.product.map(|p| p.name),
                quantity: line.item.quantity,
                price: line.item.price,
                subtotal: line.item.line_total(),
            })
            .collect();
        order_response(self.order, items)
    }
}

fn order_response(order: order::Model, items: Vec<OrderItemResponse>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        order_number: order.order_number,
        user_id: order.user_id,
        total_amount: order.total_amount,
        status: order.status,
        paid_at: order.paid_at,
        notes: order.notes,
        items,
        created_at: order.created_at,
        updated_at: order.updated_at,
    }
}

/// `ORD-YYYYMMDD-XXXXXXXXXX`; the suffix is random and the column is unique.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "ORD-{}-{}",
        now.format("%Y%m%d"),
        random[..10].to_ascii_uppercase()
    )
}

/// A line that passed validation and whose stock has been taken
struct PricedLine {
    product: product::Model,
    quantity: i32,
}

/// Builds orders from carts and serves order reads
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates an order for `user_id`.
    ///
    /// Everything happens in one transaction: each line is checked and its
    /// stock taken in input order, then the order and its lines are written.
    /// Any failure rolls the whole attempt back, including stock already taken
    /// for earlier lines.
    #[instrument(skip(self, request), fields(user_id = %user_id, lines = request.items.len()))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        request.validate()?;
        if let Some(bad) = request.items.iter().find(|item| item.quantity <= 0) {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} must be positive",
                bad.product_id
            )));
        }

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        UserEntity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::UserNotFound(user_id))?;

        let mut priced = Vec::with_capacity(request.items.len());
        let mut total_amount = Decimal::ZERO;

        for item in &request.items {
            let product = ProductEntity::find_by_id(item.product_id)
                .one(&txn)
                .await?
                .ok_or(ServiceError::ProductNotFound(item.product_id))?;

            if !product.is_available() {
                return Err(ServiceError::ProductNotAvailable(product.id));
            }
            if product.stock < item.quantity {
                return Err(ServiceError::InsufficientStock {
                    product_id: product.id,
                    requested: item.quantity,
                });
            }

            // The conditional update is what actually guards against concurrent buyers.
            StockLedger::reduce_with(&txn, product.id, item.quantity).await?;

            total_amount += product.price * Decimal::from(item.quantity);
            priced.push(PricedLine {
                product,
                quantity: item.quantity,
            });
        }

        let order_id = Uuid::new_v4();
        let order_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(Utc::now())),
            user_id: Set(user_id),
            total_amount: Set(total_amount),
            status: Set(OrderStatus::Pending),
            paid_at: Set(None),
            notes: Set(request.notes),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        let mut items = Vec::with_capacity(priced.len());
        for (line_no, line) in (1..).zip(priced) {
            let item = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                line_no: Set(line_no),
                quantity: Set(line.quantity),
                price: Set(line.product.price),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            items.push(OrderItemResponse {
                id: item.id,
                product_id: item.product_id,
                product_name: Some(line.product.name),
                quantity: item.quantity,
                price: item.price,
                subtotal: item.line_total(),
            });
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        counter!("storefront_orders.created", 1);
        info!(
            order_id = %order_id,
            order_number = %order_model.order_number,
            total_amount = %total_amount,
            "Order created successfully"
        );

        if let Some(event_sender) = &self.event_sender {
            event_sender
                .send_or_log(Event::OrderCreated {
                    order_id,
                    user_id,
                    total_amount,
                })
                .await;
        }

        Ok(order_response(order_model, items))
    }

    /// Loads an order with its owner and lines.
    pub async fn load_order_details<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let user = UserEntity::find_by_id(order.user_id)
            .one(conn)
            .await?
            .ok_or(ServiceError::UserNotFound(order.user_id))?;

        let lines = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::LineNo)
            .find_also_related(ProductEntity)
            .all(conn)
            .await?
            .into_iter()
            .map(|(item, product)| OrderLine { item, product })
            .collect();

        Ok(OrderDetails { order, user, lines })
    }

    /// Returns an order the caller owns, or any order for an admin.
    #[instrument(skip(self, caller), fields(caller_id = %caller.user_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        caller: &AuthenticatedUser,
    ) -> Result<OrderResponse, ServiceError> {
        let details = Self::load_order_details(&*self.db_pool, order_id).await?;
        if let Err(e) = caller.ensure_can_access(details.order.user_id) {
            warn!(order_id = %order_id, "Order access denied");
            return Err(e);
        }
        Ok(details.into_response())
    }

    /// Orders placed by `user_id`, newest first.
    #[instrument(skip(self))]
    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<Page<OrderResponse>, ServiceError> {
        let query = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt);
        self.paginate(query, page, per_page).await
    }

    /// All orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<Page<OrderResponse>, ServiceError> {
        let query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        self.paginate(query, page, per_page).await
    }

    async fn paginate(
        &self,
        query: sea_orm::Select<OrderEntity>,
        page: u64,
        per_page: u64,
    ) -> Result<Page<OrderResponse>, ServiceError> {
        let (page, per_page) = checked_page(page, per_page)?;
        let db = &*self.db_pool;
        let paginator = query.paginate(db, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;

        let orders = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, page, per_page, "Failed to fetch orders page");
            ServiceError::DatabaseError(e)
        })?;

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut lines = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_item::Column::LineNo)
            .find_also_related(ProductEntity)
            .all(db)
            .await?;

        let items = orders
            .into_iter()
            .map(|order| {
                let (mine, rest): (Vec<_>, Vec<_>) =
                    lines.drain(..).partition(|(item, _)| item.order_id == order.id);
                lines = rest;
                let items = mine
                    .into_iter()
                    .map(|(item, product)| OrderItemResponse {
                        subtotal: item.line_total(),
                        id: item.id,
                        product_id: item.product_id,
                        product_name: product.map(|p| p.name),
                        quantity: item.quantity,
                        price: item.price,
                    })
                    .collect();
                order_response(order, items)
            })
            .collect();

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }
}
