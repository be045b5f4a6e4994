//! Caller identity.
//!
//! Tokens are validated by the edge proxy, which forwards the resolved user
//! as `x-user-id` / `x-user-role`. This module turns those headers into an
//! [`AuthenticatedUser`] request extension and exposes it as an extractor.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::entities::UserRole;
use crate::errors::ServiceError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthenticatedUser {
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: Uuid) -> Self {
        Self::new(user_id, UserRole::Customer)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Owners and admins may see a resource; everyone else is refused.
    pub fn ensure_can_access(&self, owner_id: Uuid) -> Result<(), ServiceError> {
        if self.is_admin() || self.user_id == owner_id {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "resource belongs to another user".to_string(),
            ))
        }
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("admin role required".to_string()))
        }
    }
}

fn identity_from_headers(parts_headers: &axum::http::HeaderMap) -> Option<AuthenticatedUser> {
    let user_id = parts_headers
        .get(USER_ID_HEADER)?
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())?;

    // an unknown role is treated as the least-privileged one
    let role = parts_headers
        .get(USER_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| UserRole::from_str(v.trim()).ok())
        .unwrap_or(UserRole::Customer);

    Some(AuthenticatedUser { user_id, role })
}

/// Attaches the forwarded identity, if any, to the request.
pub async fn forwarded_identity_middleware(mut request: Request, next: Next) -> Response {
    if let Some(user) = identity_from_headers(request.headers()) {
        debug!(user_id = %user.user_id, role = %user.role, "Forwarded identity attached");
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or_else(|| ServiceError::Unauthorized("missing caller identity".to_string()))
    }
}
