//! Discount policy applied at order finalization.
//!
//! Eligibility is a table of rules evaluated against the client's profile.
//! Rules never stack: the highest matching rate wins.

use serde::{Deserialize, Serialize};

use crate::catalog::Client;

/// A discount rate in basis points (1 bp = 0.01%).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountRate(u16);

impl DiscountRate {
    /// No discount.
    pub const ZERO: Self = Self(0);

    /// Basis points in 100%.
    pub const FULL_BPS: u16 = 10_000;

    /// Create a rate from basis points, capped at 100%.
    #[must_use]
    pub const fn from_bps(bps: u16) -> Self {
        if bps > Self::FULL_BPS {
            Self(Self::FULL_BPS)
        } else {
            Self(bps)
        }
    }

    /// Create a rate from whole percent, capped at 100%.
    #[must_use]
    pub const fn from_percent(percent: u16) -> Self {
        if percent > 100 {
            Self(Self::FULL_BPS)
        } else {
            Self(percent * 100)
        }
    }

    /// The rate in basis points.
    #[must_use]
    pub const fn bps(self) -> u16 {
        self.0
    }

    /// `floor(subtotal_cents * rate)` for non-negative subtotals.
    #[must_use]
    pub fn discount_on(self, subtotal_cents: i64) -> i64 {
        if subtotal_cents <= 0 {
            return 0;
        }
        let discount =
            i128::from(subtotal_cents) * i128::from(self.0) / i128::from(Self::FULL_BPS);
        // discount <= subtotal_cents, so it always fits
        i64::try_from(discount).unwrap_or(subtotal_cents)
    }
}

/// Decides the discount a client gets when an order is finalized.
pub trait DiscountPolicy: Send + Sync {
    /// Rate for `client`, evaluated inside the finalize transaction.
    fn rate_for(&self, client: &Client) -> DiscountRate;
}

/// One eligibility condition and the rate it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum DiscountRule {
    /// The client supports Flamengo.
    SupportsFlamengo {
        /// Rate granted.
        rate: DiscountRate,
    },
    /// The client watches One Piece.
    WatchesOnePiece {
        /// Rate granted.
        rate: DiscountRate,
    },
    /// The client lives in the named city (case-insensitive).
    LivesIn {
        /// City to match.
        city: String,
        /// Rate granted.
        rate: DiscountRate,
    },
}

impl DiscountRule {
    /// The rate this rule grants if it matches `client`.
    #[must_use]
    pub fn evaluate(&self, client: &Client) -> Option<DiscountRate> {
        match self {
            Self::SupportsFlamengo { rate } => client.supports_flamengo.then_some(*rate),
            Self::WatchesOnePiece { rate } => client.watches_one_piece.then_some(*rate),
            Self::LivesIn { city, rate } => client.lives_in(city).then_some(*rate),
        }
    }
}

/// A discount policy backed by a rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTablePolicy {
    rules: Vec<DiscountRule>,
}

impl RuleTablePolicy {
    /// Build a policy from an explicit rule list.
    #[must_use]
    pub fn new(rules: Vec<DiscountRule>) -> Self {
        Self { rules }
    }

    /// A policy that never grants a discount.
    #[must_use]
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }
}

impl Default for RuleTablePolicy {
    /// 10% for Flamengo supporters, One Piece watchers, and residents of Sousa.
    fn default() -> Self {
        let ten = DiscountRate::from_percent(10);
        Self::new(vec![
            DiscountRule::SupportsFlamengo { rate: ten },
            DiscountRule::WatchesOnePiece { rate: ten },
            DiscountRule::LivesIn {
                city: "sousa".into(),
                rate: ten,
            },
        ])
    }
}

impl DiscountPolicy for RuleTablePolicy {
    fn rate_for(&self, client: &Client) -> DiscountRate {
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(client))
            .max()
            .unwrap_or(DiscountRate::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClientId;

    fn client() -> Client {
        Client::new(ClientId::from_raw(1), "Ana", "ana@example.com")
    }

    #[test]
    fn ten_percent_of_1000_is_100() {
        assert_eq!(DiscountRate::from_percent(10).discount_on(1000), 100);
    }

    #[test]
    fn discount_floors_and_ignores_non_positive() {
        let rate = DiscountRate::from_bps(1000);
        assert_eq!(rate.discount_on(15), 1);
        assert_eq!(rate.discount_on(9), 0);
        assert_eq!(rate.discount_on(0), 0);
        assert_eq!(rate.discount_on(-50), 0);
    }

    #[test]
    fn rate_is_capped() {
        assert_eq!(DiscountRate::from_percent(250).bps(), 10_000);
        assert_eq!(DiscountRate::from_bps(60_000).bps(), 10_000);
    }

    #[test]
    fn plain_client_gets_nothing() {
        let policy = RuleTablePolicy::default();
        assert_eq!(policy.rate_for(&client()), DiscountRate::ZERO);
    }

    #[test]
    fn each_flag_grants_ten_percent() {
        let policy = RuleTablePolicy::default();
        let ten = DiscountRate::from_percent(10);

        let mut flamengo = client();
        flamengo.supports_flamengo = true;
        assert_eq!(policy.rate_for(&flamengo), ten);

        let mut one_piece = client();
        one_piece.watches_one_piece = true;
        assert_eq!(policy.rate_for(&one_piece), ten);

        let mut sousa = client();
        sousa.city = Some("Sousa".into());
        assert_eq!(policy.rate_for(&sousa), ten);
    }

    #[test]
    fn rules_do_not_stack() {
        let policy = RuleTablePolicy::default();
        let mut everything = client();
        everything.supports_flamengo = true;
        everything.watches_one_piece = true;
        everything.city = Some("SOUSA".into());
        assert_eq!(policy.rate_for(&everything), DiscountRate::from_percent(10));
    }

    #[test]
    fn highest_matching_rule_wins() {
        let policy = RuleTablePolicy::new(vec![
            DiscountRule::SupportsFlamengo {
                rate: DiscountRate::from_percent(5),
            },
            DiscountRule::LivesIn {
                city: "recife".into(),
                rate: DiscountRate::from_percent(15),
            },
        ]);
        let mut c = client();
        c.supports_flamengo = true;
        c.city = Some("Recife".into());
        assert_eq!(policy.rate_for(&c), DiscountRate::from_percent(15));
    }

    #[test]
    fn empty_policy() {
        let mut c = client();
        c.supports_flamengo = true;
        assert_eq!(RuleTablePolicy::none().rate_for(&c), DiscountRate::ZERO);
    }
}
