//! Role extractors.
//!
//! The service sits behind a gateway that authenticates callers and forwards
//! their role in the `X-Role` header. Employee-only routes take an
//! [`EmployeeRole`] argument.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

/// Header carrying the caller's role.
pub const ROLE_HEADER: &str = "x-role";

/// Role value that grants access to employee routes.
pub const EMPLOYEE_ROLE: &str = "employee";

/// Proof that the caller is an employee.
#[derive(Debug, Clone, Copy)]
pub struct EmployeeRole;

#[async_trait]
impl<S> FromRequestParts<S> for EmployeeRole
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim);

        match role {
            Some(role) if role.eq_ignore_ascii_case(EMPLOYEE_ROLE) => Ok(Self),
            _ => {
                tracing::warn!(path = %parts.uri.path(), role = ?role, "Employee role required");
                Err(ApiError::Forbidden)
            }
        }
    }
}
