//! Sales report handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use credit_ledger_core::report::parse_month;
use credit_ledger_core::SellerMonthlySales;

use crate::auth::EmployeeRole;
use crate::error::ApiError;
use crate::extract::ApiQuery;
use crate::state::AppState;

/// Monthly sales query.
#[derive(Debug, Deserialize)]
pub struct MonthlySalesQuery {
    /// Restrict to one month, formatted `YYYY-MM`.
    #[serde(default)]
    pub month: Option<String>,
}

/// Confirmed sales per seller and month (employee only).
pub async fn seller_monthly_sales(
    _role: EmployeeRole,
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<MonthlySalesQuery>,
) -> Result<Json<Vec<SellerMonthlySales>>, ApiError> {
    let month = match query.month.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_month(raw).ok_or_else(|| {
            ApiError::invalid_request(format!("month must be formatted YYYY-MM, got {raw:?}"))
        })?),
    };

    let rows = state.store.seller_monthly_sales(month).await?;
    Ok(Json(rows))
}
