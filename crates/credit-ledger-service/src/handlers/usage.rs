//! Usage reporting handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_ledger_core::{BillingError, ClientId};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::metering::{meter_usage, UsageReport};
use crate::state::AppState;

/// Usage report request.
#[derive(Debug, Deserialize)]
pub struct ReportUsageRequest {
    /// Client to charge.
    pub client_id: i64,
    /// Model used. Defaults to the configured model.
    #[serde(default)]
    pub model: Option<String>,
    /// Prompt tokens consumed.
    #[serde(default)]
    pub prompt_tokens: i64,
    /// Completion tokens produced.
    #[serde(default)]
    pub completion_tokens: i64,
    /// Extra context stored on the ledger entry.
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// Usage report response.
#[derive(Debug, Serialize)]
pub struct ReportUsageResponse {
    /// Client charged.
    pub client_id: ClientId,
    /// Model charged.
    pub model: String,
    /// Balance after the debit.
    pub balance_credits: i64,
    /// Credits debited.
    pub credits_spent: i64,
    /// Prompt plus completion tokens.
    pub tokens_processed: i64,
    /// Prompt rate per 1000 tokens.
    pub prompt_rate: f64,
    /// Completion rate per 1000 tokens.
    pub completion_rate: f64,
}

/// Price a usage event and debit the client's wallet.
pub async fn report_usage(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ReportUsageRequest>,
) -> Result<Json<ReportUsageResponse>, ApiError> {
    let client_id =
        ClientId::new(req.client_id).map_err(|e| BillingError::invalid_id("client_id", e))?;

    let report = UsageReport {
        client_id,
        model: req.model,
        prompt_tokens: req.prompt_tokens,
        completion_tokens: req.completion_tokens,
        meta: req.meta.unwrap_or_else(|| serde_json::json!({})),
    };

    let metered = match meter_usage(state.store.as_ref(), &state.config.default_model, report).await
    {
        Ok(metered) => metered,
        Err(e) => {
            tracing::warn!(client_id = %client_id, code = e.code(), "Usage debit rejected");
            return Err(e);
        }
    };

    tracing::info!(
        client_id = %client_id,
        model = %metered.model,
        credits_spent = metered.quote.credits,
        balance_credits = metered.balance_credits,
        "Usage recorded"
    );

    Ok(Json(ReportUsageResponse {
        client_id,
        model: metered.model,
        balance_credits: metered.balance_credits,
        credits_spent: metered.quote.credits,
        tokens_processed: metered.tokens_processed,
        prompt_rate: metered.quote.prompt_rate,
        completion_rate: metered.quote.completion_rate,
    }))
}
