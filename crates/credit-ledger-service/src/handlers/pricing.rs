//! Pricing rule handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use credit_ledger_core::{CreditQuote, ModelPricing, PricingRuleInput};

use crate::auth::EmployeeRole;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::metering::quote_usage;
use crate::state::AppState;

/// List active pricing rules in resolution order.
pub async fn list_pricing(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ModelPricing>>, ApiError> {
    let rules = state.store.list_active_pricing().await?;
    Ok(Json(rules))
}

/// Insert or update a pricing rule (employee only).
pub async fn upsert_pricing(
    _role: EmployeeRole,
    State(state): State<Arc<AppState>>,
    ApiJson(rule): ApiJson<PricingRuleInput>,
) -> Result<Json<ModelPricing>, ApiError> {
    let saved = state.store.upsert_pricing(rule).await?;

    tracing::info!(
        rule_id = saved.id,
        pattern = %saved.pattern,
        priority = saved.priority,
        active = saved.active,
        "Pricing rule saved"
    );

    Ok(Json(saved))
}

/// Quote query parameters.
#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    /// Model to price. Defaults to the configured model.
    #[serde(default)]
    pub model: Option<String>,
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: i64,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: i64,
}

/// Price usage without debiting anything.
pub async fn quote(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<QuoteQuery>,
) -> Result<Json<CreditQuote>, ApiError> {
    let model = query
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());

    let quote = quote_usage(
        state.store.as_ref(),
        model.trim(),
        query.prompt_tokens,
        query.completion_tokens,
    )
    .await?;
    Ok(Json(quote))
}
