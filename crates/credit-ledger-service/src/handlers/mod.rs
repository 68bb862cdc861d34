//! API handlers.

pub mod health;
pub mod orders;
pub mod pricing;
pub mod reports;
pub mod usage;
pub mod wallets;

use credit_ledger_core::{BillingError, ClientId, OrderId};

use crate::error::ApiError;

/// Parse a client id taken from the request path.
pub(crate) fn path_client_id(raw: &str) -> Result<ClientId, ApiError> {
    raw.parse::<ClientId>()
        .map_err(|e| BillingError::invalid_id("client_id", e).into())
}

/// Parse an order id taken from the request path.
pub(crate) fn path_order_id(raw: &str) -> Result<OrderId, ApiError> {
    raw.parse::<OrderId>()
        .map_err(|e| BillingError::invalid_id("order_id", e).into())
}
