use crate::{
    db::DbPool,
    entities::product::{self, ActiveModel as ProductActiveModel, Entity as ProductEntity},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub sku: String,
    #[validate(custom = "validate_price")]
    pub price: Decimal,
    #[validate(range(min = 0))]
    pub stock: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub sku: String,
    pub price: Decimal,
    pub stock: i32,
    pub is_active: bool,
    pub is_available: bool,
    pub category_id: Option<Uuid>,
}

impl From<product::Model> for ProductResponse {
    fn from(model: product::Model) -> Self {
        Self {
            is_available: model.is_available(),
            id: model.id,
            name: model.name,
            description: model.description,
            sku: model.sku,
            price: model.price,
            stock: model.stock,
            is_active: model.is_active,
            category_id: model.category_id,
        }
    }
}

fn default_true() -> bool {
    true
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        let mut err = ValidationError::new("price");
        err.message = Some("price cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Catalog maintenance needed by the order flow. Stock is not writable here
/// after creation; use the stock ledger for that.
#[derive(Clone)]
pub struct ProductService {
    db_pool: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(sku = %request.sku))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProductResponse, ServiceError> {
        request.validate()?;

        let model = ProductActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            description: Set(request.description),
            sku: Set(request.sku),
            price: Set(request.price),
            stock: Set(request.stock),
            is_active: Set(request.is_active),
            category_id: Set(request.category_id),
            ..Default::default()
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create product");
            ServiceError::DatabaseError(e)
        })?;

        info!(product_id = %model.id, "Product created");
        Ok(model.into())
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductResponse, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?
            .map(ProductResponse::from)
            .ok_or(ServiceError::ProductNotFound(product_id))
    }

    /// Changes the list price. Existing orders keep the price they captured.
    #[instrument(skip(self))]
    pub async fn update_price(
        &self,
        product_id: Uuid,
        price: Decimal,
    ) -> Result<ProductResponse, ServiceError> {
        validate_price(&price)
            .map_err(|_| ServiceError::ValidationError("price cannot be negative".into()))?;

        let existing = ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?
            .ok_or(ServiceError::ProductNotFound(product_id))?;

        let mut active = existing.into_active_model();
        active.price = Set(price);
        let updated = active.update(&*self.db_pool).await?;

        info!(product_id = %product_id, %price, "Product price updated");
        Ok(updated.into())
    }

    #[instrument(skip(self))]
    pub async fn set_active(
        &self,
        product_id: Uuid,
        is_active: bool,
    ) -> Result<ProductResponse, ServiceError> {
        let existing = ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await?
            .ok_or(ServiceError::ProductNotFound(product_id))?;

        let mut active = existing.into_active_model();
        active.is_active = Set(is_active);
        Ok(active.update(&*self.db_pool).await?.into())
    }
}
