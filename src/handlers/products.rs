use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    cache::{self, keys},
    services::products::ProductResponse,
    ApiResponse, ApiResult, AppState,
};

pub fn product_routes() -> Router<AppState> {
    Router::new().route("/:id", get(get_product))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    summary = "Get product",
    description = "Product with its current price and stock. Served from cache when warm.",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product retrieved", body = ApiResponse<ProductResponse>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProductResponse> {
    let key = keys::product(id);

    match cache::get_json::<ProductResponse>(state.cache.as_ref(), &key).await {
        Ok(Some(product)) => {
            debug!(product_id = %id, "Product cache hit");
            return Ok(Json(ApiResponse::success(product)));
        }
        Ok(None) => {}
        Err(e) => warn!(product_id = %id, error = %e, "Product cache read failed"),
    }

    let product = state.services.products.get_product(id).await?;

    if let Err(e) = cache::set_json(
        state.cache.as_ref(),
        &key,
        &product,
        Some(state.config.product_cache_ttl()),
    )
    .await
    {
        warn!(product_id = %id, error = %e, "Product cache write failed");
    }

    Ok(Json(ApiResponse::success(product)))
}
