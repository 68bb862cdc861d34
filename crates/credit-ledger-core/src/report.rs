//! Sales reporting.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SellerId;

/// Confirmed sales of one seller in one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerMonthlySales {
    /// First instant of the month (UTC).
    pub month: DateTime<Utc>,
    /// The seller.
    pub seller_id: SellerId,
    /// Number of confirmed orders.
    pub orders_count: i64,
    /// Sum of `total_cents` over those orders.
    pub total_cents: i64,
}

/// Truncate a timestamp to the first instant of its month.
#[must_use]
pub fn month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(at)
}

/// Parse `YYYY-MM` into the first instant of that month.
#[must_use]
pub fn parse_month(value: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}
