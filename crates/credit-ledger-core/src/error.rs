//! Error types for credit ledger business rules.

use crate::ids::{IdError, PlanId};
use crate::order::PaymentStatus;

/// Result type for credit ledger operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Business-rule violations detected by the domain layer.
///
/// Persistence failures are not represented here; the store crate wraps these
/// together with its own database errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BillingError {
    /// An order was submitted without any line items.
    #[error("order must contain at least one item")]
    OrderWithoutItems,

    /// A line item quantity was zero or negative.
    #[error("quantity must be positive for plan {plan_id}, got {quantity}")]
    InvalidQuantity {
        /// The plan on the offending line.
        plan_id: PlanId,
        /// The rejected quantity.
        quantity: i32,
    },

    /// The payment method is not one of the accepted methods.
    #[error("invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    /// An identifier in the request was malformed.
    #[error("invalid {field}: {source}")]
    InvalidId {
        /// Which request field carried the identifier.
        field: &'static str,
        /// The parse failure.
        #[source]
        source: IdError,
    },

    /// An amount was out of range (negative credits, negative tokens).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A plan does not have enough stock for the requested quantity.
    #[error("insufficient stock for plan {plan_id}: available={available}, requested={requested}")]
    InsufficientStock {
        /// The plan that ran out.
        plan_id: PlanId,
        /// Stock at the time of the check.
        available: i32,
        /// Quantity requested by the order line.
        requested: i32,
    },

    /// The wallet balance is lower than the requested debit.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance in credits.
        balance: i64,
        /// Credits required by the debit.
        required: i64,
    },

    /// The order is not in a state that allows the requested transition.
    #[error("invalid order transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: PaymentStatus,
        /// Requested state.
        to: PaymentStatus,
    },

    /// A stored or submitted pricing pattern is not a valid regular expression.
    #[error("invalid pricing pattern {pattern:?}: {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler diagnostic.
        message: String,
    },

    /// A pricing rate is not a finite positive number.
    #[error("invalid pricing rate: {0}")]
    InvalidRate(String),
}

impl BillingError {
    /// Wrap an identifier error with the name of the field it came from.
    #[must_use]
    pub fn invalid_id(field: &'static str, source: IdError) -> Self {
        Self::InvalidId { field, source }
    }
}
