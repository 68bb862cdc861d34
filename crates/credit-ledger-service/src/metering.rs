//! Usage metering: prices a token-consumption event and debits the wallet.
//!
//! Pricing uses a single formula for every caller,
//! `ceil((prompt * prompt_rate + completion * completion_rate) / 1000)`,
//! with both rates falling back to 1.0 when no rule matches the model.

use credit_ledger_core::{BillingError, ClientId, CreditQuote, PricingTable, UsageDebit};
use credit_ledger_store::Store;

use crate::error::ApiError;

/// A usage event as reported by a caller.
#[derive(Debug, Clone)]
pub struct UsageReport {
    /// The client to charge.
    pub client_id: ClientId,
    /// Model name; `None` means the configured default model.
    pub model: Option<String>,
    /// Prompt tokens consumed.
    pub prompt_tokens: i64,
    /// Completion tokens produced.
    pub completion_tokens: i64,
    /// Extra context stored on the ledger entry.
    pub meta: serde_json::Value,
}

/// Outcome of a metered debit.
#[derive(Debug, Clone, PartialEq)]
pub struct MeteredUsage {
    /// Model that was charged.
    pub model: String,
    /// Credits and rates applied.
    pub quote: CreditQuote,
    /// Wallet balance after the debit.
    pub balance_credits: i64,
    /// Prompt plus completion tokens.
    pub tokens_processed: i64,
}

/// Price usage for `model` against the active pricing rules.
///
/// # Errors
///
/// - `ApiError::PricingFailed` if a stored rule has a malformed pattern.
/// - `INVALID_REQUEST` if a token count is negative.
pub async fn quote_usage(
    store: &dyn Store,
    model: &str,
    prompt_tokens: i64,
    completion_tokens: i64,
) -> Result<CreditQuote, ApiError> {
    let rules = store.list_active_pricing().await?;
    let table = PricingTable::compile(&rules).map_err(|e| match e {
        BillingError::InvalidPattern { .. } => ApiError::PricingFailed(e.to_string()),
        other => other.into(),
    })?;
    if table.is_empty() {
        tracing::debug!(model, "No active pricing rules, charging default rates");
    }

    Ok(table.quote(model, prompt_tokens, completion_tokens)?)
}

/// Price a usage report and debit the client's wallet.
///
/// # Errors
///
/// - `INVALID_REQUEST` for negative token counts.
/// - `PRICING_FAILED` for a misconfigured pricing table.
/// - `INSUFFICIENT_CREDITS` if the wallet cannot cover the charge.
/// - `WALLET_NOT_FOUND` if the client does not exist.
pub async fn meter_usage(
    store: &dyn Store,
    default_model: &str,
    report: UsageReport,
) -> Result<MeteredUsage, ApiError> {
    let model = report
        .model
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| default_model.to_string());

    let quote = quote_usage(store, &model, report.prompt_tokens, report.completion_tokens).await?;

    let debit = UsageDebit::new(
        report.client_id,
        model.clone(),
        report.prompt_tokens,
        report.completion_tokens,
        quote.credits,
    )?
    .with_meta(report.meta);

    let balance_credits = store.debit(&debit).await?;

    Ok(MeteredUsage {
        model,
        quote,
        balance_credits,
        tokens_processed: debit.total_tokens(),
    })
}
