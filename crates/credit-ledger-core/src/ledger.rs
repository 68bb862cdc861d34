//! Wallet and credit ledger types.
//!
//! Every balance change is mirrored by exactly one immutable ledger entry, so
//! the sum of `credits_delta` for a client always equals the wallet balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BillingError, Result};
use crate::ids::{ClientId, LedgerEntryId};

/// A client's spendable credit balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owning client.
    pub client_id: ClientId,
    /// Current balance in credits. Never negative.
    pub balance_credits: i64,
}

impl Wallet {
    /// Check if the wallet can cover a debit of `credits`.
    #[must_use]
    pub const fn can_cover(&self, credits: i64) -> bool {
        self.balance_credits >= credits
    }

    /// Validate a debit against this wallet and return the post-debit balance.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InsufficientCredits` if the balance is too low.
    pub fn debit_preview(&self, credits: i64) -> Result<i64> {
        if self.can_cover(credits) {
            Ok(self.balance_credits - credits)
        } else {
            Err(BillingError::InsufficientCredits {
                balance: self.balance_credits,
                required: credits,
            })
        }
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    /// Credits added by a purchase (order finalize or direct top-up).
    Topup,
    /// Credits spent on metered usage.
    Usage,
    /// Credits returned to the client.
    Refund,
    /// Manual correction.
    Adjust,
}

impl LedgerEntryType {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Topup => "TOPUP",
            Self::Usage => "USAGE",
            Self::Refund => "REFUND",
            Self::Adjust => "ADJUST",
        }
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEntryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "TOPUP" => Ok(Self::Topup),
            "USAGE" => Ok(Self::Usage),
            "REFUND" => Ok(Self::Refund),
            "ADJUST" => Ok(Self::Adjust),
            other => Err(format!("unknown ledger entry type: {other}")),
        }
    }
}

/// A persisted, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    /// Entry identifier, assigned in insertion order.
    pub id: LedgerEntryId,
    /// The client whose balance changed.
    pub client_id: ClientId,
    /// Kind of entry.
    #[serde(rename = "type")]
    pub entry_type: LedgerEntryType,
    /// Signed balance change in credits.
    pub credits_delta: i64,
    /// Money paid (positive) or returned (negative) in cents.
    pub price_cents_delta: i64,
    /// Free-form context (order id, model, request id).
    pub meta: serde_json::Value,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

/// A ledger entry that has not been written yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    /// The client whose balance changes.
    pub client_id: ClientId,
    /// Kind of entry.
    pub entry_type: LedgerEntryType,
    /// Signed balance change in credits.
    pub credits_delta: i64,
    /// Money delta in cents.
    pub price_cents_delta: i64,
    /// Free-form context.
    pub meta: serde_json::Value,
}

impl NewLedgerEntry {
    /// A top-up entry adding `credits` to the wallet.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` if `credits` is negative.
    pub fn topup(
        client_id: ClientId,
        credits: i64,
        price_cents: i64,
        meta: serde_json::Value,
    ) -> Result<Self> {
        if credits < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "top-up credits must not be negative, got {credits}"
            )));
        }
        Ok(Self {
            client_id,
            entry_type: LedgerEntryType::Topup,
            credits_delta: credits,
            price_cents_delta: price_cents,
            meta,
        })
    }

    /// A usage entry removing `credits` from the wallet.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` if `credits` is negative.
    pub fn usage(client_id: ClientId, credits: i64, meta: serde_json::Value) -> Result<Self> {
        if credits < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "usage credits must not be negative, got {credits}"
            )));
        }
        Ok(Self {
            client_id,
            entry_type: LedgerEntryType::Usage,
            credits_delta: -credits,
            price_cents_delta: 0,
            meta,
        })
    }

    /// Materialize the entry once the store has assigned an id and timestamp.
    #[must_use]
    pub fn into_entry(self, id: LedgerEntryId, created_at: DateTime<Utc>) -> CreditLedgerEntry {
        CreditLedgerEntry {
            id,
            client_id: self.client_id,
            entry_type: self.entry_type,
            credits_delta: self.credits_delta,
            price_cents_delta: self.price_cents_delta,
            meta: self.meta,
            created_at,
        }
    }
}

/// Result of comparing a wallet balance against its ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// The client checked.
    pub client_id: ClientId,
    /// Balance stored on the wallet row.
    pub balance_credits: i64,
    /// Sum of `credits_delta` over the client's ledger.
    pub ledger_sum: i64,
}

impl Reconciliation {
    /// Whether the wallet balance equals the ledger sum.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.balance_credits == self.ledger_sum
    }
}

/// Order ledger entries newest first: `created_at` descending, then `id` descending.
pub fn sort_newest_first(entries: &mut [CreditLedgerEntry]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
