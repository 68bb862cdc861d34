//! Catalog records consumed by the ledger core.
//!
//! Clients, sellers and plans are created and edited elsewhere; the ledger
//! only reads them, except for plan stock which order finalization decrements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClientId, PlanId, SellerId};

/// A buyer on the platform.
///
/// The profile flags feed the discount policy at finalize time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    /// Client identifier.
    pub id: ClientId,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// `false` once the client has been soft-deleted.
    pub status: bool,
    /// Profile flag: supports Flamengo.
    pub supports_flamengo: bool,
    /// Profile flag: watches One Piece.
    pub watches_one_piece: bool,
    /// Home city, free text.
    pub city: Option<String>,
    /// When the client registered.
    pub registered_at: DateTime<Utc>,
}

impl Client {
    /// Create an active client with all profile flags cleared.
    #[must_use]
    pub fn new(id: ClientId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            status: true,
            supports_flamengo: false,
            watches_one_piece: false,
            city: None,
            registered_at: Utc::now(),
        }
    }

    /// Whether the client's city matches `city`, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn lives_in(&self, city: &str) -> bool {
        self.city
            .as_deref()
            .is_some_and(|c| c.trim().eq_ignore_ascii_case(city))
    }
}

/// A sales channel that orders are attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    /// Seller identifier.
    pub id: SellerId,
    /// Display name.
    pub name: String,
}

/// A purchasable bundle of credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier.
    pub id: PlanId,
    /// Unique plan name.
    pub plan_name: String,
    /// Unit price in cents.
    pub price_cents: i64,
    /// Credits granted per unit purchased.
    pub amount_credits: i64,
    /// Units available for sale. Never negative.
    pub stock: i32,
    /// Catalog category (e.g. `CREDITS`).
    pub category: String,
    /// `false` once the plan has been soft-deleted.
    pub status: bool,
}
