//! Storage layer for the credit ledger.
//!
//! This crate owns every write to wallets, the credit ledger, plan stock and
//! orders. Each mutating operation runs as one atomic unit: either all of its
//! rows are written or none are.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`. Row locks (`FOR UPDATE`) serialize
//!   writers on the same wallet or client; every transaction runs under a
//!   deadline and rolls back when it elapses.
//! - [`MemoryStore`]: a single-mutex in-process store with the same semantics,
//!   used by tests and local runs without a database.
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger_core::{Client, ClientId};
//! use credit_ledger_store::{MemoryStore, Store};
//!
//! # async fn run() -> credit_ledger_store::Result<()> {
//! let store = MemoryStore::new();
//! store.put_client(Client::new(ClientId::from_raw(1), "Ana", "ana@example.com")).await;
//!
//! let balance = store
//!     .credit(ClientId::from_raw(1), 50, 1990, serde_json::json!({}))
//!     .await?;
//! assert_eq!(balance, 50);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod pg;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use credit_ledger_core::{
    Client, ClientId, CreditLedgerEntry, DiscountPolicy, FinalizedOrder, ModelPricing, NewOrder,
    Order, OrderId, Plan, PlanId, PricingRuleInput, Reconciliation, Seller, SellerId,
    SellerMonthlySales, UsageDebit, Wallet,
};

/// Largest page returned by [`Store::list_ledger`].
pub const MAX_LEDGER_PAGE: i64 = 200;

/// Clamp caller-supplied pagination to `1..=MAX_LEDGER_PAGE` and a non-negative offset.
#[must_use]
pub fn clamp_page(limit: i64, offset: i64) -> (i64, i64) {
    (limit.clamp(1, MAX_LEDGER_PAGE), offset.max(0))
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer so handlers can run against
/// PostgreSQL in production and an in-memory store in tests.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short name of the backend, reported by the health endpoint.
    fn backend(&self) -> &'static str;

    // =========================================================================
    // Catalog (read-only)
    // =========================================================================

    /// Get a client by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the client doesn't exist.
    async fn get_client(&self, id: ClientId) -> Result<Client>;

    /// Get a seller by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the seller doesn't exist.
    async fn get_seller(&self, id: SellerId) -> Result<Seller>;

    /// Get a plan by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the plan doesn't exist.
    async fn get_plan(&self, id: PlanId) -> Result<Plan>;

    // =========================================================================
    // Wallet Ledger
    // =========================================================================

    /// Get a client's wallet, creating it with a zero balance on first access.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` (entity `wallet`) if the client does not exist.
    async fn get_balance(&self, client_id: ClientId) -> Result<Wallet>;

    /// Add `credits` to a wallet and append a TOPUP ledger entry.
    ///
    /// Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidAmount` if `credits` is negative.
    /// - `StoreError::NotFound` (entity `wallet`) if the client does not exist.
    async fn credit(
        &self,
        client_id: ClientId,
        credits: i64,
        price_cents_delta: i64,
        meta: serde_json::Value,
    ) -> Result<i64>;

    /// Remove credits from a wallet for metered usage.
    ///
    /// The balance check and the decrement happen under the wallet's row lock,
    /// so concurrent debits never overdraw. On success a usage event and a
    /// USAGE ledger entry are written. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `BillingError::InsufficientCredits` if the balance is too low.
    /// - `StoreError::NotFound` (entity `wallet`) if the client does not exist.
    async fn debit(&self, debit: &UsageDebit) -> Result<i64>;

    /// List ledger entries for a client, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ledger(
        &self,
        client_id: ClientId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditLedgerEntry>>;

    /// Compare the wallet balance with the sum of the client's ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn reconcile(&self, client_id: ClientId) -> Result<Reconciliation>;

    // =========================================================================
    // Orders
    // =========================================================================

    /// Create a `PENDING` order, capturing current plan prices.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` for a missing client, seller or plan.
    /// - `BillingError::InsufficientStock` if a plan cannot cover its line.
    async fn create_order(&self, order: &NewOrder) -> Result<Order>;

    /// Get an order with its items.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the order doesn't exist.
    async fn get_order(&self, id: OrderId) -> Result<Order>;

    /// List a client's orders with their items, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_orders_by_client(&self, client_id: ClientId) -> Result<Vec<Order>>;

    /// Confirm a pending order: take stock, apply the discount, issue credits.
    ///
    /// Runs as one transaction holding the client's row lock. If any line is
    /// out of stock nothing is written and the order is then marked `FAILED`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the order doesn't exist.
    /// - `BillingError::InvalidTransition` if the order is not `PENDING`.
    /// - `BillingError::InsufficientStock` if a line cannot be covered.
    async fn finalize_order(
        &self,
        id: OrderId,
        policy: &dyn DiscountPolicy,
    ) -> Result<FinalizedOrder>;

    // =========================================================================
    // Pricing
    // =========================================================================

    /// Active pricing rules in `(priority, id)` order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_active_pricing(&self) -> Result<Vec<ModelPricing>>;

    /// Insert a rule, or update it when `id` is set.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidPattern` / `InvalidRate` for an invalid rule.
    /// - `StoreError::NotFound` when updating a rule that doesn't exist.
    async fn upsert_pricing(&self, rule: PricingRuleInput) -> Result<ModelPricing>;

    // =========================================================================
    // Reports
    // =========================================================================

    /// Confirmed sales grouped by month and seller, optionally for one month.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn seller_monthly_sales(
        &self,
        month: Option<DateTime<Utc>>,
    ) -> Result<Vec<SellerMonthlySales>>;
}
