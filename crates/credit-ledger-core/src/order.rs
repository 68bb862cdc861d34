//! Order types and the finalize state machine.
//!
//! An order is created `PENDING` with prices captured from the catalog, and is
//! finalized exactly once:
//!
//! ```text
//! PENDING ──finalize ok──────────▶ CONFIRMED
//!    │
//!    └──finalize out of stock────▶ FAILED
//! ```
//!
//! The store runs finalization inside one transaction; this module supplies
//! the arithmetic it applies per line ([`FinalizeTally`]) and the final
//! discount split ([`Settlement`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::discount::DiscountRate;
use crate::error::{BillingError, Result};
use crate::ids::{ClientId, OrderId, OrderItemId, PlanId, SellerId};

/// Accepted payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Credit or debit card.
    Card,
    /// Brazilian bank slip.
    Boleto,
    /// Instant transfer.
    Pix,
    /// Platform currency.
    Berries,
}

impl PaymentMethod {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Card => "CARD",
            Self::Boleto => "BOLETO",
            Self::Pix => "PIX",
            Self::Berries => "BERRIES",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = BillingError;

    /// Parse case-insensitively, ignoring surrounding whitespace.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CARD" => Ok(Self::Card),
            "BOLETO" => Ok(Self::Boleto),
            "PIX" => Ok(Self::Pix),
            "BERRIES" => Ok(Self::Berries),
            _ => Err(BillingError::InvalidPaymentMethod(s.to_string())),
        }
    }
}

/// Payment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Created, awaiting finalize.
    Pending,
    /// Finalized: stock taken, credits issued.
    Confirmed,
    /// Finalize was rejected.
    Failed,
    /// Canceled before finalize.
    Canceled,
}

impl PaymentStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Only `PENDING` has outgoing edges; every other state is terminal.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed | Self::Failed)
        )
    }

    /// Validate a transition.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidTransition` if the edge does not exist.
    pub fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(BillingError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// One line of a persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Line identifier.
    pub id: OrderItemId,
    /// Owning order.
    pub order_id: OrderId,
    /// Purchased plan.
    pub plan_id: PlanId,
    /// Units purchased. Always positive.
    pub quantity: i32,
    /// Plan price captured when the order was created.
    pub unit_price_cents: i64,
}

impl OrderItem {
    /// `unit_price_cents * quantity`.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` if the product overflows.
    pub fn line_total_cents(&self) -> Result<i64> {
        line_total(self.plan_id, self.unit_price_cents, self.quantity)
    }
}

/// `unit_price_cents * quantity` for a line, refusing to wrap.
///
/// # Errors
///
/// Returns `BillingError::InvalidAmount` if the product overflows.
pub fn line_total(plan_id: PlanId, unit_price_cents: i64, quantity: i32) -> Result<i64> {
    unit_price_cents
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| overflow(&format!("line total for plan {plan_id}")))
}

/// Add `amount` to a running total, refusing to wrap.
///
/// # Errors
///
/// Returns `BillingError::InvalidAmount` if the sum overflows.
pub fn accumulate(total: i64, amount: i64, what: &str) -> Result<i64> {
    total.checked_add(amount).ok_or_else(|| overflow(what))
}

fn overflow(what: &str) -> BillingError {
    BillingError::InvalidAmount(format!("{what} overflows"))
}

/// A persisted order with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,
    /// Buyer.
    pub client_id: ClientId,
    /// Sales channel.
    pub seller_id: SellerId,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// How the client pays.
    pub payment_method: PaymentMethod,
    /// Current state.
    pub payment_status: PaymentStatus,
    /// Sum of line totals.
    pub subtotal_cents: i64,
    /// Discount granted at finalize.
    pub discount_cents: i64,
    /// `subtotal_cents - discount_cents`.
    pub total_cents: i64,
    /// Lines in insertion order.
    pub items: Vec<OrderItem>,
}

/// A line requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    /// Plan to buy.
    pub plan_id: PlanId,
    /// Units to buy.
    pub quantity: i32,
}

/// A validated order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Buyer.
    pub client_id: ClientId,
    /// Sales channel.
    pub seller_id: SellerId,
    /// Normalized payment method.
    pub payment_method: PaymentMethod,
    /// Requested lines, in order.
    pub items: Vec<NewOrderItem>,
}

impl NewOrder {
    /// Build an order request, checking everything that needs no catalog lookup.
    ///
    /// # Errors
    ///
    /// - `BillingError::OrderWithoutItems` if `items` is empty.
    /// - `BillingError::InvalidPaymentMethod` for an unknown method.
    /// - `BillingError::InvalidQuantity` for a non-positive quantity.
    pub fn new(
        client_id: ClientId,
        seller_id: SellerId,
        payment_method: &str,
        items: Vec<NewOrderItem>,
    ) -> Result<Self> {
        if items.is_empty() {
            return Err(BillingError::OrderWithoutItems);
        }

        let payment_method = payment_method.parse::<PaymentMethod>()?;

        if let Some(bad) = items.iter().find(|item| item.quantity <= 0) {
            return Err(BillingError::InvalidQuantity {
                plan_id: bad.plan_id,
                quantity: bad.quantity,
            });
        }

        Ok(Self {
            client_id,
            seller_id,
            payment_method,
            items,
        })
    }
}

/// Stock check applied to every line, at creation (advisory) and at finalize.
///
/// # Errors
///
/// Returns `BillingError::InsufficientStock` if `available < requested`.
pub fn check_stock(plan_id: PlanId, available: i32, requested: i32) -> Result<()> {
    if available < requested {
        return Err(BillingError::InsufficientStock {
            plan_id,
            available,
            requested,
        });
    }
    Ok(())
}

/// Running totals accumulated while finalize walks the order lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeTally {
    /// Sum of `unit_price_cents * quantity`.
    pub subtotal_cents: i64,
    /// Sum of `quantity * amount_credits`.
    pub credits_added: i64,
}

impl FinalizeTally {
    /// Account for one line whose stock has already been taken.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` if either running total would
    /// overflow. The tally is left untouched in that case.
    pub fn add_line(&mut self, item: &OrderItem, amount_credits: i64) -> Result<()> {
        let subtotal = accumulate(self.subtotal_cents, item.line_total_cents()?, "order subtotal")?;
        let credits = i64::from(item.quantity)
            .checked_mul(amount_credits)
            .ok_or_else(|| overflow(&format!("credits for plan {}", item.plan_id)))?;
        self.credits_added = accumulate(self.credits_added, credits, "credits added")?;
        self.subtotal_cents = subtotal;
        Ok(())
    }

    /// Apply the discount rate and produce the final figures.
    #[must_use]
    pub fn settle(self, rate: DiscountRate) -> Settlement {
        let discount_cents = rate.discount_on(self.subtotal_cents);
        Settlement {
            subtotal_cents: self.subtotal_cents,
            discount_cents,
            total_cents: self.subtotal_cents - discount_cents,
            credits_added: self.credits_added,
        }
    }
}

/// Final figures written by a successful finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Sum of line totals.
    pub subtotal_cents: i64,
    /// `floor(subtotal_cents * rate)`.
    pub discount_cents: i64,
    /// `subtotal_cents - discount_cents`.
    pub total_cents: i64,
    /// Credits issued to the client's wallet.
    pub credits_added: i64,
}

impl Settlement {
    /// Ledger metadata for the top-up entry issued by finalize.
    #[must_use]
    pub fn ledger_meta(order_id: OrderId) -> serde_json::Value {
        serde_json::json!({ "order_id": order_id.get() })
    }
}

/// Outcome of a successful finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedOrder {
    /// The confirmed order.
    pub order: Order,
    /// Wallet balance after the credits were issued.
    pub wallet_balance: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i32, unit_price_cents: i64) -> OrderItem {
        OrderItem {
            id: OrderItemId::from_raw(1),
            order_id: OrderId::from_raw(1),
            plan_id: PlanId::from_raw(1),
            quantity,
            unit_price_cents,
        }
    }

    fn line(plan: i64, quantity: i32) -> NewOrderItem {
        NewOrderItem {
            plan_id: PlanId::from_raw(plan),
            quantity,
        }
    }

    #[test]
    fn payment_method_is_case_insensitive() {
        assert_eq!(" pix ".parse::<PaymentMethod>(), Ok(PaymentMethod::Pix));
        assert_eq!("Berries".parse::<PaymentMethod>(), Ok(PaymentMethod::Berries));
        assert!(matches!(
            "cash".parse::<PaymentMethod>(),
            Err(BillingError::InvalidPaymentMethod(_))
        ));
    }

    #[test]
    fn only_pending_has_transitions() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Confirmed));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Canceled));
        assert!(!PaymentStatus::Confirmed.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Confirmed));
        assert!(!PaymentStatus::Confirmed.can_transition_to(PaymentStatus::Confirmed));

        assert_eq!(
            PaymentStatus::Confirmed.transition(PaymentStatus::Confirmed),
            Err(BillingError::InvalidTransition {
                from: PaymentStatus::Confirmed,
                to: PaymentStatus::Confirmed,
            })
        );
    }

    #[test]
    fn new_order_requires_items() {
        let result = NewOrder::new(ClientId::from_raw(1), SellerId::from_raw(1), "card", vec![]);
        assert_eq!(result, Err(BillingError::OrderWithoutItems));
    }

    #[test]
    fn new_order_rejects_non_positive_quantity() {
        let result = NewOrder::new(
            ClientId::from_raw(1),
            SellerId::from_raw(1),
            "card",
            vec![line(1, 2), line(9, 0)],
        );
        assert_eq!(
            result,
            Err(BillingError::InvalidQuantity {
                plan_id: PlanId::from_raw(9),
                quantity: 0
            })
        );
    }

    #[test]
    fn new_order_normalizes_payment_method() {
        let order = NewOrder::new(
            ClientId::from_raw(1),
            SellerId::from_raw(1),
            "boleto",
            vec![line(1, 1)],
        )
        .unwrap();
        assert_eq!(order.payment_method, PaymentMethod::Boleto);
    }

    #[test]
    fn stock_check() {
        assert!(check_stock(PlanId::from_raw(1), 3, 3).is_ok());
        assert_eq!(
            check_stock(PlanId::from_raw(1), 0, 1),
            Err(BillingError::InsufficientStock {
                plan_id: PlanId::from_raw(1),
                available: 0,
                requested: 1
            })
        );
    }

    #[test]
    fn tally_with_ten_percent_discount() {
        let mut tally = FinalizeTally::default();
        tally.add_line(&item(2, 300), 50).unwrap();
        tally.add_line(&item(1, 400), 70).unwrap();

        let settlement = tally.settle(DiscountRate::from_percent(10));
        assert_eq!(settlement.subtotal_cents, 1000);
        assert_eq!(settlement.discount_cents, 100);
        assert_eq!(settlement.total_cents, 900);
        assert_eq!(settlement.credits_added, 170);
    }

    #[test]
    fn discount_is_floored() {
        let mut tally = FinalizeTally::default();
        tally.add_line(&item(1, 999), 1).unwrap();

        let settlement = tally.settle(DiscountRate::from_percent(10));
        assert_eq!(settlement.discount_cents, 99);
        assert_eq!(settlement.total_cents, 900);
    }

    #[test]
    fn tally_refuses_to_wrap() {
        let mut tally = FinalizeTally::default();
        tally.add_line(&item(1, 10), 5).unwrap();

        let huge_price = tally.add_line(&item(2, i64::MAX / 2 + 1), 1);
        assert!(matches!(huge_price, Err(BillingError::InvalidAmount(_))));

        let huge_credits = tally.add_line(&item(3, 1), i64::MAX / 2);
        assert!(matches!(huge_credits, Err(BillingError::InvalidAmount(_))));

        assert_eq!(tally.subtotal_cents, 10);
        assert_eq!(tally.credits_added, 5);
    }

    #[test]
    fn line_total_overflow_is_an_error() {
        assert_eq!(line_total(PlanId::from_raw(1), 250, 4), Ok(1000));
        assert!(matches!(
            line_total(PlanId::from_raw(1), i64::MAX, 2),
            Err(BillingError::InvalidAmount(_))
        ));
        assert!(matches!(
            accumulate(i64::MAX, 1, "order subtotal"),
            Err(BillingError::InvalidAmount(_))
        ));
    }

    #[test]
    fn finalize_meta_carries_order_id() {
        let meta = Settlement::ledger_meta(OrderId::from_raw(12));
        assert_eq!(meta, serde_json::json!({ "order_id": 12 }));
    }
}
