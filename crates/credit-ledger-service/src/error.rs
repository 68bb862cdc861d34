//! API error types and responses.
//!
//! Every failure is rendered as
//!
//! ```json
//! { "error": true, "code": "INSUFFICIENT_CREDITS", "message": "..." }
//! ```
//!
//! where `code` is stable and machine-readable. Internal failures are logged
//! here and reach the client only as a generic message.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use credit_ledger_core::BillingError;
use credit_ledger_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad request - invalid input.
    #[error("{message}")]
    BadRequest {
        /// Stable error code.
        code: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// Forbidden - the caller lacks the required role.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("{message}")]
    NotFound {
        /// Stable error code.
        code: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// Conflict - the request is valid but the current state rejects it.
    #[error("{message}")]
    Conflict {
        /// Stable error code.
        code: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// The pricing table could not be evaluated.
    #[error("pricing failed: {0}")]
    PricingFailed(String),

    /// A store transaction exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// A 400 with the generic `INVALID_REQUEST` code.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: "INVALID_REQUEST",
            message: message.into(),
        }
    }

    /// The stable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. }
            | Self::NotFound { code, .. }
            | Self::Conflict { code, .. } => *code,
            Self::Forbidden => "FORBIDDEN",
            Self::PricingFailed(_) => "PRICING_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PricingFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: bool,
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                "An internal error occurred".to_string()
            }
            Self::PricingFailed(msg) => {
                tracing::error!(error = %msg, "Pricing table is misconfigured");
                "Usage could not be priced".to_string()
            }
            Self::Timeout(msg) => {
                tracing::error!(operation = %msg, "Store operation timed out");
                "The operation timed out and was rolled back".to_string()
            }
            other => {
                tracing::debug!(code, message = %other, "Request rejected");
                other.to_string()
            }
        };

        let body = ErrorResponse {
            error: true,
            code,
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let message = err.to_string();
        match err {
            BillingError::OrderWithoutItems | BillingError::InvalidQuantity { .. } => {
                Self::BadRequest {
                    code: "INVALID_ORDER",
                    message,
                }
            }
            BillingError::InvalidPaymentMethod(_) => Self::BadRequest {
                code: "INVALID_PAYMENT_METHOD",
                message,
            },
            BillingError::InvalidId { field, .. } => Self::BadRequest {
                code: match field {
                    "client_id" => "INVALID_CLIENT_ID",
                    "order_id" => "INVALID_ORDER_ID",
                    _ => "INVALID_REQUEST",
                },
                message,
            },
            BillingError::InvalidAmount(_) => Self::BadRequest {
                code: "INVALID_REQUEST",
                message,
            },
            BillingError::InvalidPattern { .. } => Self::BadRequest {
                code: "INVALID_PATTERN",
                message,
            },
            BillingError::InvalidRate(_) => Self::BadRequest {
                code: "INVALID_RATE",
                message,
            },
            BillingError::InsufficientStock { .. } => Self::Conflict {
                code: "INSUFFICIENT_STOCK",
                message,
            },
            BillingError::InsufficientCredits { .. } => Self::Conflict {
                code: "INSUFFICIENT_CREDITS",
                message,
            },
            BillingError::InvalidTransition { from, .. } => Self::Conflict {
                code: "ORDER_NOT_PENDING",
                message: format!("order is {from}, only PENDING orders can be finalized"),
            },
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound {
                code: match entity {
                    "client" => "CLIENT_NOT_FOUND",
                    "seller" => "SELLER_NOT_FOUND",
                    "plan" => "PLAN_NOT_FOUND",
                    "order" => "ORDER_NOT_FOUND",
                    "wallet" => "WALLET_NOT_FOUND",
                    "pricing rule" => "PRICING_RULE_NOT_FOUND",
                    _ => "NOT_FOUND",
                },
                message: format!("{entity} not found: {id}"),
            },
            StoreError::Billing(err) => err.into(),
            StoreError::Timeout { operation } => Self::Timeout(operation.to_string()),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}
