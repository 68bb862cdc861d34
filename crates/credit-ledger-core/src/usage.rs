//! Metered usage types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::ids::{ClientId, UsageEventId};
use crate::ledger::NewLedgerEntry;

/// A priced usage event ready to be debited from a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageDebit {
    /// The client being charged.
    pub client_id: ClientId,
    /// Model that served the request.
    pub model: String,
    /// Prompt tokens consumed.
    pub prompt_tokens: i64,
    /// Completion tokens produced.
    pub completion_tokens: i64,
    /// Credits to debit, already priced.
    pub credits: i64,
    /// Extra context stored on the ledger entry.
    pub meta: serde_json::Value,
}

impl UsageDebit {
    /// Build a debit, rejecting negative counts.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` if any token count or the credit
    /// amount is negative.
    pub fn new(
        client_id: ClientId,
        model: impl Into<String>,
        prompt_tokens: i64,
        completion_tokens: i64,
        credits: i64,
    ) -> Result<Self> {
        if prompt_tokens < 0 || completion_tokens < 0 {
            return Err(BillingError::InvalidAmount(
                "token counts must not be negative".into(),
            ));
        }
        if credits < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "credits must not be negative, got {credits}"
            )));
        }
        Ok(Self {
            client_id,
            model: model.into(),
            prompt_tokens,
            completion_tokens,
            credits,
            meta: serde_json::Value::Object(serde_json::Map::new()),
        })
    }

    /// Attach extra ledger context.
    #[must_use]
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    /// `prompt_tokens + completion_tokens`.
    #[must_use]
    pub fn total_tokens(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Ledger metadata: caller meta merged with the model and token counts.
    #[must_use]
    pub fn ledger_meta(&self) -> serde_json::Value {
        let mut meta = match &self.meta {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("extra".into(), other.clone());
                map
            }
        };
        meta.insert("model".into(), self.model.clone().into());
        meta.insert("prompt_tokens".into(), self.prompt_tokens.into());
        meta.insert("completion_tokens".into(), self.completion_tokens.into());
        serde_json::Value::Object(meta)
    }

    /// The USAGE ledger entry paired with this debit.
    ///
    /// # Errors
    ///
    /// Propagates `NewLedgerEntry::usage` validation.
    pub fn ledger_entry(&self) -> Result<NewLedgerEntry> {
        NewLedgerEntry::usage(self.client_id, self.credits, self.ledger_meta())
    }
}

/// Audit record of one metered call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Event identifier.
    pub id: UsageEventId,
    /// The client charged.
    pub client_id: ClientId,
    /// Model that served the request.
    pub model: String,
    /// Prompt tokens consumed.
    pub prompt_tokens: i64,
    /// Completion tokens produced.
    pub completion_tokens: i64,
    /// Credits debited.
    pub credits_spent: i64,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

impl UsageEvent {
    /// Materialize the audit record for a committed debit.
    #[must_use]
    pub fn from_debit(id: UsageEventId, debit: &UsageDebit, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            client_id: debit.client_id,
            model: debit.model.clone(),
            prompt_tokens: debit.prompt_tokens,
            completion_tokens: debit.completion_tokens,
            credits_spent: debit.credits,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerEntryType;

    #[test]
    fn rejects_negative_tokens() {
        let result = UsageDebit::new(ClientId::from_raw(1), "m", -5, 0, 1);
        assert!(matches!(result, Err(BillingError::InvalidAmount(_))));
    }

    #[test]
    fn ledger_entry_debits_credits() {
        let debit = UsageDebit::new(ClientId::from_raw(3), "gemma3:1b", 400, 200, 6)
            .unwrap()
            .with_meta(serde_json::json!({ "request_id": "r-1" }));

        let entry = debit.ledger_entry().unwrap();
        assert_eq!(entry.entry_type, LedgerEntryType::Usage);
        assert_eq!(entry.credits_delta, -6);
        assert_eq!(entry.meta["request_id"], "r-1");
        assert_eq!(entry.meta["model"], "gemma3:1b");
        assert_eq!(entry.meta["prompt_tokens"], 400);
        assert_eq!(debit.total_tokens(), 600);
    }

    #[test]
    fn event_mirrors_debit() {
        let debit = UsageDebit::new(ClientId::from_raw(3), "m", 1, 2, 1).unwrap();
        let event = UsageEvent::from_debit(UsageEventId::from_raw(9), &debit, Utc::now());
        assert_eq!(event.credits_spent, 1);
        assert_eq!(event.completion_tokens, 2);
    }
}
