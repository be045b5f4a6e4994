use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::ServiceError;

// Core order/payment lifecycle
pub mod inventory;
pub mod order_status;
pub mod orders;
pub mod payment_notifications;
pub mod payments;

// Catalog upkeep
pub mod products;

/// Page selection shared by list endpoints. Pages are 1-based.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageRequest {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageRequest {
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    /// Clamps to `page >= 1` and `1 <= limit <= max_limit`.
    pub fn normalized(self, default_limit: u64, max_limit: u64) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(default_limit)
            .clamp(1, max_limit.max(1));
        (page, limit)
    }
}

/// Checks a 1-based page against the database's signed 64-bit offsets and
/// returns `(page, per_page)` with both raised to at least 1.
pub(crate) fn checked_page(page: u64, per_page: u64) -> Result<(u64, u64), ServiceError> {
    let (page, per_page) = (page.max(1), per_page.max(1));
    let offset = (page - 1).checked_mul(per_page);
    match offset {
        Some(offset) if offset <= i64::MAX as u64 && per_page <= i64::MAX as u64 => {
            Ok((page, per_page))
        }
        _ => Err(ServiceError::ValidationError(format!(
            "page {} is out of range for page size {}",
            page, per_page
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}
