//! Model pricing resolver.
//!
//! Pricing rules map a model identifier to credit rates per 1000 tokens using
//! regular expressions. Active rules are tried in `(priority, id)` order and
//! the first match wins; when nothing matches both rates fall back to
//! [`DEFAULT_RATE_PER_1K`].
//!
//! Credits are always rounded up:
//!
//! ```text
//! credits = ceil((prompt_tokens * prompt_rate + completion_tokens * completion_rate) / 1000)
//! ```

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Rate used for both token kinds when no rule matches.
pub const DEFAULT_RATE_PER_1K: f64 = 1.0;

/// Priority assigned to rules submitted without one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// A stored pricing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Rule identifier. Breaks ties between equal priorities.
    pub id: i64,
    /// Regular expression matched against the model name.
    pub pattern: String,
    /// Credits per 1000 prompt tokens.
    pub credits_per_1k_prompt: f64,
    /// Credits per 1000 completion tokens.
    pub credits_per_1k_completion: f64,
    /// Lower values are tried first.
    pub priority: i32,
    /// Inactive rules are ignored by the resolver.
    pub active: bool,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// A pricing rule submitted for insert (`id` absent) or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRuleInput {
    /// Existing rule to update.
    #[serde(default)]
    pub id: Option<i64>,
    /// Regular expression matched against the model name.
    pub pattern: String,
    /// Credits per 1000 prompt tokens.
    pub credits_per_1k_prompt: f64,
    /// Credits per 1000 completion tokens.
    pub credits_per_1k_completion: f64,
    /// Defaults to [`DEFAULT_PRIORITY`].
    #[serde(default)]
    pub priority: Option<i32>,
    /// Defaults to `true`.
    #[serde(default)]
    pub active: Option<bool>,
}

impl PricingRuleInput {
    /// Validate the rule and fill in defaults.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidPattern` if the pattern is blank or does not compile.
    /// - `BillingError::InvalidRate` if a rate is not finite and positive.
    pub fn validate(mut self) -> Result<Self> {
        self.pattern = self.pattern.trim().to_string();
        if self.pattern.is_empty() {
            return Err(BillingError::InvalidPattern {
                pattern: self.pattern,
                message: "pattern must not be empty".into(),
            });
        }
        compile_pattern(&self.pattern)?;

        for (name, rate) in [
            ("credits_per_1k_prompt", self.credits_per_1k_prompt),
            ("credits_per_1k_completion", self.credits_per_1k_completion),
        ] {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(BillingError::InvalidRate(format!(
                    "{name} must be a positive number, got {rate}"
                )));
            }
        }

        if self.id.is_some_and(|id| id <= 0) {
            self.id = None;
        }
        self.priority = Some(self.priority.unwrap_or(DEFAULT_PRIORITY));
        self.active = Some(self.active.unwrap_or(true));
        Ok(self)
    }

    /// Priority after defaults.
    #[must_use]
    pub fn priority_or_default(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    /// Active flag after defaults.
    #[must_use]
    pub fn active_or_default(&self) -> bool {
        self.active.unwrap_or(true)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| BillingError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Credits charged for one usage event and the rates that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreditQuote {
    /// Credits to debit.
    pub credits: i64,
    /// Prompt rate applied.
    pub prompt_rate: f64,
    /// Completion rate applied.
    pub completion_rate: f64,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    regex: Regex,
    prompt_rate: f64,
    completion_rate: f64,
}

/// Active pricing rules compiled and sorted for resolution.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    rules: Vec<CompiledRule>,
}

impl PricingTable {
    /// Compile the active rules from `rows`, in `(priority, id)` order.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidPattern` if any active rule has a
    /// malformed pattern. Stored patterns are validated on write, so this
    /// indicates a configuration problem rather than bad user input.
    pub fn compile(rows: &[ModelPricing]) -> Result<Self> {
        let mut active: Vec<&ModelPricing> = rows.iter().filter(|r| r.active).collect();
        active.sort_by_key(|r| (r.priority, r.id));

        let rules = active
            .into_iter()
            .map(|row| {
                Ok(CompiledRule {
                    regex: compile_pattern(&row.pattern)?,
                    prompt_rate: row.credits_per_1k_prompt,
                    completion_rate: row.credits_per_1k_completion,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Whether no active rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `(prompt_rate, completion_rate)` for `model`.
    #[must_use]
    pub fn resolve(&self, model: &str) -> (f64, f64) {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(model))
            .map_or((DEFAULT_RATE_PER_1K, DEFAULT_RATE_PER_1K), |rule| {
                (rule.prompt_rate, rule.completion_rate)
            })
    }

    /// Credits owed for a usage event.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` if a token count is negative.
    pub fn quote(
        &self,
        model: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) -> Result<CreditQuote> {
        if prompt_tokens < 0 || completion_tokens < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "token counts must not be negative, \
                 got prompt={prompt_tokens} completion={completion_tokens}"
            )));
        }

        let (prompt_rate, completion_rate) = self.resolve(model);
        Ok(CreditQuote {
            credits: credits_for(prompt_tokens, completion_tokens, prompt_rate, completion_rate),
            prompt_rate,
            completion_rate,
        })
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn credits_for(
    prompt_tokens: i64,
    completion_tokens: i64,
    prompt_rate: f64,
    completion_rate: f64,
) -> i64 {
    let weighted = prompt_tokens as f64 * prompt_rate + completion_tokens as f64 * completion_rate;
    (weighted / 1000.0).ceil() as i64
}
