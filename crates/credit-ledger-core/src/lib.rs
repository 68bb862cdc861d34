//! Core types and business rules for the credit ledger.
//!
//! This crate holds everything that does not touch I/O:
//!
//! - **Identifiers**: `ClientId`, `SellerId`, `PlanId`, `OrderId`, `LedgerEntryId`
//! - **Catalog**: `Client`, `Seller`, `Plan`
//! - **Ledger**: `Wallet`, `CreditLedgerEntry`, `NewLedgerEntry`, `LedgerEntryType`
//! - **Orders**: `Order`, `OrderItem`, `NewOrder`, `PaymentStatus`, `FinalizeTally`
//! - **Discounts**: `DiscountPolicy`, `RuleTablePolicy`, `DiscountRate`
//! - **Pricing**: `ModelPricing`, `PricingTable`, `CreditQuote`
//! - **Usage**: `UsageDebit`, `UsageEvent`
//! - **Reports**: `SellerMonthlySales`
//!
//! # Units
//!
//! Credits and cents are distinct units and are never converted into each other:
//! a plan costs `price_cents` and yields `amount_credits`. Both are stored as `i64`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod discount;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod order;
pub mod pricing;
pub mod report;
pub mod usage;

pub use catalog::{Client, Plan, Seller};
pub use discount::{DiscountPolicy, DiscountRate, DiscountRule, RuleTablePolicy};
pub use error::{BillingError, Result};
pub use ids::{
    ClientId, IdError, LedgerEntryId, OrderId, OrderItemId, PlanId, SellerId, UsageEventId,
};
pub use ledger::{CreditLedgerEntry, LedgerEntryType, NewLedgerEntry, Reconciliation, Wallet};
pub use order::{
    FinalizeTally, FinalizedOrder, NewOrder, NewOrderItem, Order, OrderItem, PaymentMethod,
    PaymentStatus, Settlement,
};
pub use pricing::{CreditQuote, ModelPricing, PricingRuleInput, PricingTable, DEFAULT_RATE_PER_1K};
pub use report::SellerMonthlySales;
pub use usage::{UsageDebit, UsageEvent};
