//! Wallet handlers: balance, ledger, plan top-ups and reconciliation.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{BillingError, ClientId, CreditLedgerEntry, PlanId, Wallet};

use crate::auth::EmployeeRole;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::handlers::path_client_id;
use crate::state::AppState;

/// Get a client's balance. The wallet is created on first access.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<Wallet>, ApiError> {
    let client_id = path_client_id(&client_id)?;
    let wallet = state.store.get_balance(client_id).await?;
    Ok(Json(wallet))
}

/// Ledger pagination parameters.
#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    /// Maximum number of entries to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// List ledger entries, newest first.
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    ApiQuery(query): ApiQuery<LedgerQuery>,
) -> Result<Json<Vec<CreditLedgerEntry>>, ApiError> {
    let client_id = path_client_id(&client_id)?;
    let entries = state
        .store
        .list_ledger(client_id, query.limit, query.offset)
        .await?;
    Ok(Json(entries))
}

/// Plan top-up request.
#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    /// Plan whose credits are added.
    pub plan_id: i64,
    /// Caller-supplied reference; generated when absent.
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Plan top-up response.
#[derive(Debug, Serialize)]
pub struct TopUpResponse {
    /// Client credited.
    pub client_id: ClientId,
    /// Balance after the top-up.
    pub balance_credits: i64,
    /// Credits added.
    pub added_credits: i64,
    /// Price of the plan in cents.
    pub cost_cents: i64,
}

/// Credit a wallet with the credits of one plan.
pub async fn top_up(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    ApiJson(req): ApiJson<TopUpRequest>,
) -> Result<Json<TopUpResponse>, ApiError> {
    let client_id = path_client_id(&client_id)?;
    let plan_id = PlanId::new(req.plan_id).map_err(|e| BillingError::invalid_id("plan_id", e))?;
    let plan = state.store.get_plan(plan_id).await?;

    let request_id = req
        .request_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let meta = serde_json::json!({
        "request_id": request_id,
        "type": "plan_purchase",
        "plan_id": plan.id,
    });

    let balance_credits = state
        .store
        .credit(client_id, plan.amount_credits, plan.price_cents, meta)
        .await?;

    tracing::info!(
        client_id = %client_id,
        plan_id = %plan.id,
        added_credits = plan.amount_credits,
        balance_credits,
        "Wallet topped up"
    );

    Ok(Json(TopUpResponse {
        client_id,
        balance_credits,
        added_credits: plan.amount_credits,
        cost_cents: plan.price_cents,
    }))
}

/// Reconciliation response.
#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    /// Client checked.
    pub client_id: ClientId,
    /// Current wallet balance.
    pub balance_credits: i64,
    /// Sum of the client's ledger deltas.
    pub ledger_sum: i64,
    /// Whether the two agree.
    pub consistent: bool,
}

/// Compare a wallet balance with its ledger (employee only).
pub async fn reconcile(
    _role: EmployeeRole,
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    let client_id = path_client_id(&client_id)?;
    let report = state.store.reconcile(client_id).await?;
    let consistent = report.is_consistent();

    if !consistent {
        tracing::error!(
            client_id = %client_id,
            balance_credits = report.balance_credits,
            ledger_sum = report.ledger_sum,
            "Wallet balance does not match ledger"
        );
    }

    Ok(Json(ReconciliationResponse {
        client_id: report.client_id,
        balance_credits: report.balance_credits,
        ledger_sum: report.ledger_sum,
        consistent,
    }))
}
