//! Order handlers: create, look up, list and finalize.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use credit_ledger_core::{
    BillingError, ClientId, FinalizedOrder, NewOrder, NewOrderItem, Order, PlanId, SellerId,
};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::handlers::{path_client_id, path_order_id};
use crate::state::AppState;

/// One requested order line.
#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    /// Plan to buy.
    pub plan_id: i64,
    /// Units of the plan.
    pub quantity: i32,
}

/// Create order request.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Buying client.
    pub client_id: i64,
    /// Seller the order is attributed to.
    pub seller_id: i64,
    /// `CARD`, `BOLETO`, `PIX` or `BERRIES`, any case.
    pub payment_method: String,
    /// Order lines.
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
}

impl CreateOrderRequest {
    fn into_new_order(self) -> Result<NewOrder, ApiError> {
        let client_id =
            ClientId::new(self.client_id).map_err(|e| BillingError::invalid_id("client_id", e))?;
        let seller_id =
            SellerId::new(self.seller_id).map_err(|e| BillingError::invalid_id("seller_id", e))?;

        let items = self
            .items
            .into_iter()
            .map(|item| -> Result<NewOrderItem, BillingError> {
                let plan_id = PlanId::new(item.plan_id)
                    .map_err(|e| BillingError::invalid_id("plan_id", e))?;
                Ok(NewOrderItem {
                    plan_id,
                    quantity: item.quantity,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NewOrder::new(client_id, seller_id, &self.payment_method, items)?)
    }
}

/// Create a `PENDING` order.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let new_order = req.into_new_order()?;
    let order = state.store.create_order(&new_order).await?;

    tracing::info!(
        order_id = %order.id,
        client_id = %order.client_id,
        items = order.items.len(),
        "Order created"
    );

    Ok((StatusCode::CREATED, Json(order)))
}

/// Get an order with its items.
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = path_order_id(&order_id)?;
    let order = state.store.get_order(order_id).await?;
    Ok(Json(order))
}

/// List a client's orders, newest first.
pub async fn list_client_orders(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let client_id = path_client_id(&client_id)?;
    // Unknown clients are a 404, not an empty list
    state.store.get_client(client_id).await?;

    let orders = state.store.list_orders_by_client(client_id).await?;
    Ok(Json(orders))
}

/// Confirm a pending order and issue its credits.
pub async fn finalize_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<FinalizedOrder>, ApiError> {
    let order_id = path_order_id(&order_id)?;

    let finalized = match state
        .store
        .finalize_order(order_id, state.discounts.as_ref())
        .await
    {
        Ok(finalized) => finalized,
        Err(e) => {
            tracing::warn!(order_id = %order_id, error = %e, "Order finalization rejected");
            return Err(e.into());
        }
    };

    tracing::info!(
        order_id = %order_id,
        client_id = %finalized.order.client_id,
        total_cents = finalized.order.total_cents,
        wallet_balance = finalized.wallet_balance,
        "Order finalized"
    );

    Ok(Json(finalized))
}
