//! Identifier types for the credit ledger.
//!
//! All records live in a relational store with `BIGSERIAL` keys, so every
//! identifier wraps a positive `i64`. The wrappers keep a `PlanId` from being
//! passed where an `OrderId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors produced when parsing or validating identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The value is not a base-10 integer.
    #[error("invalid identifier: not an integer")]
    NotAnInteger,

    /// Identifiers must be strictly positive.
    #[error("invalid identifier: {0} is not positive")]
    NotPositive(i64),
}

macro_rules! int_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Create an identifier, rejecting zero and negative values.
            ///
            /// # Errors
            ///
            /// Returns `IdError::NotPositive` if `value <= 0`.
            pub const fn new(value: i64) -> Result<Self, IdError> {
                if value > 0 {
                    Ok(Self(value))
                } else {
                    Err(IdError::NotPositive(value))
                }
            }

            /// Wrap a raw key read back from the store.
            #[must_use]
            pub const fn from_raw(value: i64) -> Self {
                Self(value)
            }

            /// Return the underlying integer.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s.trim().parse::<i64>().map_err(|_| IdError::NotAnInteger)?;
                Self::new(value)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

int_id!(
    /// A client (buyer) identifier.
    ClientId
);
int_id!(
    /// A seller (sales channel) identifier.
    SellerId
);
int_id!(
    /// A plan (credit bundle) identifier.
    PlanId
);
int_id!(
    /// An order identifier.
    OrderId
);
int_id!(
    /// An order line identifier.
    OrderItemId
);
int_id!(
    /// A credit ledger entry identifier.
    ///
    /// Ledger ids are assigned in insertion order and break ties between
    /// entries that share a `created_at` timestamp.
    LedgerEntryId
);
int_id!(
    /// A usage event identifier.
    UsageEventId
);
