use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// Owns every write to `products.stock`.
///
/// Each mutation is a single conditional `UPDATE`, so concurrent callers can
/// never drive stock below zero no matter how their reads interleave. The
/// `*_with` variants run against any connection, which lets the order and
/// cancellation flows fold stock changes into their own transaction.
#[derive(Clone)]
pub struct StockLedger {
    db_pool: Arc<DbPool>,
}

impl StockLedger {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Atomically removes `quantity` units, failing without side effects if fewer are on hand.
    #[instrument(skip(self))]
    pub async fn reduce(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        Self::reduce_with(&*self.db_pool, product_id, quantity).await
    }

    /// Returns `quantity` units. `Ok(false)` means the product no longer exists.
    #[instrument(skip(self))]
    pub async fn increase(&self, product_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        Self::increase_with(&*self.db_pool, product_id, quantity).await
    }

    /// Current units on hand.
    pub async fn available(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        let product = ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?
            .ok_or(ServiceError::ProductNotFound(product_id))?;
        Ok(product.stock)
    }

    pub async fn reduce_with<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        ensure_positive(quantity)?;

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(conn)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %product_id, "Failed to reduce stock");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 1 {
            debug!(product_id = %product_id, quantity, "Stock reduced");
            return Ok(());
        }

        // Zero rows: either the product is gone or the guard rejected the update.
        let exists = ProductEntity::find_by_id(product_id).one(conn).await?.is_some();
        if !exists {
            return Err(ServiceError::ProductNotFound(product_id));
        }

        counter!("storefront_inventory.stock_rejections", 1);
        warn!(product_id = %product_id, requested = quantity, "Insufficient stock");
        Err(ServiceError::InsufficientStock {
            product_id,
            requested: quantity,
        })
    }

    pub async fn increase_with<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        ensure_positive(quantity)?;

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %product_id, "Failed to increase stock");
                ServiceError::DatabaseError(e)
            })?;

        Ok(result.rows_affected > 0)
    }
}

fn ensure_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::services::products::{CreateProductRequest, ProductService};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    async fn setup(stock: i32) -> (StockLedger, Uuid) {
        let db = establish_connection_with_config(&DbConfig::new("sqlite::memory:"))
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        let db = Arc::new(db);

        let product = ProductService::new(db.clone())
            .create_product(CreateProductRequest {
                name: "Teh Botol".into(),
                description: None,
                sku: "TEH-1".into(),
                price: dec!(5.50),
                stock,
                is_active: true,
                category_id: None,
            })
            .await
            .unwrap();

        (StockLedger::new(db), product.id)
    }

    #[tokio::test]
    async fn reduce_takes_exact_quantity() {
        let (ledger, id) = setup(5).await;
        ledger.reduce(id, 3).await.unwrap();
        assert_eq!(ledger.available(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reduce_beyond_stock_changes_nothing() {
        let (ledger, id) = setup(2).await;
        let err = ledger.reduce(id, 3).await.unwrap_err();
        assert_matches!(err, ServiceError::InsufficientStock { requested: 3, .. });
        assert_eq!(ledger.available(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reduce_to_zero_is_allowed() {
        let (ledger, id) = setup(2).await;
        ledger.reduce(id, 2).await.unwrap();
        assert_eq!(ledger.available(id).await.unwrap(), 0);
        assert_matches!(
            ledger.reduce(id, 1).await,
            Err(ServiceError::InsufficientStock { .. })
        );
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let (ledger, _) = setup(2).await;
        let missing = Uuid::new_v4();
        assert_matches!(
            ledger.reduce(missing, 1).await,
            Err(ServiceError::ProductNotFound(id)) if id == missing
        );
        assert!(!ledger.increase(missing, 1).await.unwrap());
    }

    #[tokio::test]
    async fn non_positive_quantities_are_rejected() {
        let (ledger, id) = setup(2).await;
        assert_matches!(ledger.reduce(id, 0).await, Err(ServiceError::ValidationError(_)));
        assert_matches!(ledger.increase(id, -1).await, Err(ServiceError::ValidationError(_)));
        assert_eq!(ledger.available(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn increase_returns_units() {
        let (ledger, id) = setup(1).await;
        assert!(ledger.increase(id, 4).await.unwrap());
        assert_eq!(ledger.available(id).await.unwrap(), 5);
    }
}
