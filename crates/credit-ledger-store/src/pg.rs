//! PostgreSQL storage backend.
//!
//! Every mutating operation opens one transaction and runs it under
//! `tokio::time::timeout`. Returning early (including on timeout, which drops
//! the future) drops the `sqlx::Transaction`, which rolls it back.
//!
//! Locking:
//!
//! - wallet writes lock the wallet row (`FOR UPDATE` or the implicit lock of
//!   `UPDATE`/`INSERT ... ON CONFLICT`), so debits on one wallet serialize;
//! - finalize locks both the order and its client (`FOR UPDATE OF o, c`), so
//!   finalizations for one client serialize;
//! - stock is taken with a conditional `UPDATE ... WHERE stock >= $n`, which
//!   can never drive stock negative.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;

use credit_ledger_core::order::{accumulate, check_stock, line_total};
use credit_ledger_core::report::month_start;
use credit_ledger_core::{
    BillingError, Client, ClientId, CreditLedgerEntry, DiscountPolicy, FinalizeTally,
    FinalizedOrder, LedgerEntryId, LedgerEntryType, ModelPricing, NewLedgerEntry, NewOrder, Order,
    OrderId, OrderItem, OrderItemId, PaymentMethod, PaymentStatus, Plan, PlanId, PricingRuleInput,
    Reconciliation, Seller, SellerId, SellerMonthlySales, Settlement, UsageDebit, Wallet,
};

use crate::error::{Result, StoreError};
use crate::{clamp_page, Store};

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct ClientRow {
    id: i64,
    name: String,
    email: String,
    status: bool,
    supports_flamengo: bool,
    watches_one_piece: bool,
    city: Option<String>,
    registered_at: DateTime<Utc>,
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Self {
            id: ClientId::from_raw(row.id),
            name: row.name,
            email: row.email,
            status: row.status,
            supports_flamengo: row.supports_flamengo,
            watches_one_piece: row.watches_one_piece,
            city: row.city,
            registered_at: row.registered_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LockedOrderRow {
    payment_status: String,
    #[sqlx(flatten)]
    client: ClientRow,
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: i64,
    plan_name: String,
    price_cents: i64,
    amount_credits: i64,
    stock: i32,
    category: String,
    status: bool,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Self {
            id: PlanId::from_raw(row.id),
            plan_name: row.plan_name,
            price_cents: row.price_cents,
            amount_credits: row.amount_credits,
            stock: row.stock,
            category: row.category,
            status: row.status,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    client_id: i64,
    seller_id: i64,
    created_at: DateTime<Utc>,
    payment_method: String,
    payment_status: String,
    subtotal_cents: i64,
    discount_cents: i64,
    total_cents: i64,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order {
            id: OrderId::from_raw(self.id),
            client_id: ClientId::from_raw(self.client_id),
            seller_id: SellerId::from_raw(self.seller_id),
            created_at: self.created_at,
            payment_method: self
                .payment_method
                .parse::<PaymentMethod>()
                .map_err(|e: BillingError| StoreError::Serialization(e.to_string()))?,
            payment_status: parse_status(&self.payment_status)?,
            subtotal_cents: self.subtotal_cents,
            discount_cents: self.discount_cents,
            total_cents: self.total_cents,
            items,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: i64,
    order_id: i64,
    plan_id: i64,
    quantity: i32,
    unit_price_cents: i64,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            id: OrderItemId::from_raw(row.id),
            order_id: OrderId::from_raw(row.order_id),
            plan_id: PlanId::from_raw(row.plan_id),
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: i64,
    client_id: i64,
    entry_type: String,
    credits_delta: i64,
    price_cents_delta: i64,
    meta: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for CreditLedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(Self {
            id: LedgerEntryId::from_raw(row.id),
            client_id: ClientId::from_raw(row.client_id),
            entry_type: row
                .entry_type
                .parse::<LedgerEntryType>()
                .map_err(StoreError::Serialization)?,
            credits_delta: row.credits_delta,
            price_cents_delta: row.price_cents_delta,
            meta: row.meta,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PricingRow {
    id: i64,
    pattern: String,
    credits_per_1k_prompt: f64,
    credits_per_1k_completion: f64,
    priority: i32,
    active: bool,
    updated_at: DateTime<Utc>,
}

impl From<PricingRow> for ModelPricing {
    fn from(row: PricingRow) -> Self {
        Self {
            id: row.id,
            pattern: row.pattern,
            credits_per_1k_prompt: row.credits_per_1k_prompt,
            credits_per_1k_completion: row.credits_per_1k_completion,
            priority: row.priority,
            active: row.active,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SalesRow {
    month: DateTime<Utc>,
    seller_id: i64,
    orders_count: i64,
    total_cents: i64,
}

fn parse_status(value: &str) -> Result<PaymentStatus> {
    value.parse().map_err(StoreError::Serialization)
}

const ORDER_COLUMNS: &str = "id, client_id, seller_id, created_at, payment_method, \
     payment_status, subtotal_cents, discount_cents, total_cents";

const LEDGER_COLUMNS: &str =
    "id, client_id, type AS entry_type, credits_delta, price_cents_delta, meta, created_at";

const PRICING_COLUMNS: &str = "id, pattern, credits_per_1k_prompt, credits_per_1k_completion, \
     priority, active, updated_at";

// ============================================================================
// Store
// ============================================================================

/// PostgreSQL implementation of [`Store`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    tx_timeout: Duration,
}

impl PgStore {
    /// Connect to PostgreSQL.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the pool cannot be created.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        tx_timeout: Duration,
    ) -> Result<Self> {
        tracing::info!(max_connections, "Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::database("connect to PostgreSQL", e))?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self::new(pool, tx_timeout))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool, tx_timeout: Duration) -> Self {
        Self { pool, tx_timeout }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::database("run migrations", e))?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Run `work` under the transaction deadline.
    async fn bounded<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        if let Ok(result) = tokio::time::timeout(self.tx_timeout, work).await {
            result
        } else {
            tracing::error!(operation, timeout = ?self.tx_timeout, "Transaction deadline exceeded");
            Err(StoreError::Timeout { operation })
        }
    }

    async fn load_items(&self, order_ids: &[i64]) -> Result<HashMap<i64, Vec<OrderItem>>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, order_id, plan_id, quantity, unit_price_cents
             FROM order_items
             WHERE order_id = ANY($1)
             ORDER BY order_id, id",
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database("load order items", e))?;

        let mut grouped: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            grouped.entry(row.order_id).or_default().push(row.into());
        }
        Ok(grouped)
    }

    async fn finalize_in_tx(
        &self,
        id: OrderId,
        policy: &dyn DiscountPolicy,
    ) -> Result<FinalizedOrder> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::database("begin finalize", e))?;

        let locked = sqlx::query_as::<_, LockedOrderRow>(
            "SELECT o.payment_status,
                    c.id, c.name, c.email, c.status, c.supports_flamengo,
                    c.watches_one_piece, c.city, c.registered_at
             FROM orders o
             JOIN clients c ON c.id = o.client_id
             WHERE o.id = $1
             FOR UPDATE OF o, c",
        )
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::database(format!("lock order {id}"), e))?
        .ok_or_else(|| StoreError::not_found("order", id))?;

        parse_status(&locked.payment_status)?.transition(PaymentStatus::Confirmed)?;
        let client = Client::from(locked.client);
        let rate = policy.rate_for(&client);

        let items: Vec<OrderItem> = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, order_id, plan_id, quantity, unit_price_cents
             FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(id.get())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::database(format!("load items of order {id}"), e))?
        .into_iter()
        .map(OrderItem::from)
        .collect();

        let mut tally = FinalizeTally::default();
        for item in &items {
            let amount_credits = take_stock(&mut tx, item).await?;
            tally.add_line(item, amount_credits)?;
        }

        let settlement = tally.settle(rate);

        let order_row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET subtotal_cents = $2, discount_cents = $3, total_cents = $4,
                 payment_status = 'CONFIRMED'
             WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id.get())
        .bind(settlement.subtotal_cents)
        .bind(settlement.discount_cents)
        .bind(settlement.total_cents)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::database(format!("confirm order {id}"), e))?;

        let entry = NewLedgerEntry::topup(
            client.id,
            settlement.credits_added,
            settlement.total_cents,
            Settlement::ledger_meta(id),
        )?;
        insert_ledger(&mut tx, &entry).await?;
        let wallet_balance = add_to_wallet(&mut tx, client.id, settlement.credits_added).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::database(format!("commit finalize of order {id}"), e))?;

        let order = order_row.into_order(items)?;
        tracing::info!(
            order_id = %id,
            client_id = %client.id,
            total_cents = order.total_cents,
            discount_cents = order.discount_cents,
            credits_added = settlement.credits_added,
            wallet_balance,
            "Order finalized"
        );

        Ok(FinalizedOrder {
            order,
            wallet_balance,
        })
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

fn wallet_error(client_id: ClientId, context: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
            StoreError::not_found("wallet", client_id)
        }
        _ => StoreError::database(format!("{context} for client {client_id}"), err),
    }
}

/// Create the wallet row with a zero balance unless it already exists.
async fn ensure_wallet(conn: &mut PgConnection, client_id: ClientId) -> Result<()> {
    sqlx::query(
        "INSERT INTO wallets (client_id, balance_credits) VALUES ($1, 0)
         ON CONFLICT (client_id) DO NOTHING",
    )
    .bind(client_id.get())
    .execute(conn)
    .await
    .map_err(|e| wallet_error(client_id, "create wallet", e))?;
    Ok(())
}

/// Add credits to a wallet, creating it if needed. Returns the new balance.
async fn add_to_wallet(conn: &mut PgConnection, client_id: ClientId, credits: i64) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO wallets (client_id, balance_credits) VALUES ($1, $2)
         ON CONFLICT (client_id)
         DO UPDATE SET balance_credits = wallets.balance_credits + EXCLUDED.balance_credits
         RETURNING balance_credits",
    )
    .bind(client_id.get())
    .bind(credits)
    .fetch_one(conn)
    .await
    .map_err(|e| wallet_error(client_id, "credit wallet", e))
}

async fn insert_ledger(conn: &mut PgConnection, entry: &NewLedgerEntry) -> Result<LedgerEntryId> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO credit_ledger (client_id, type, credits_delta, price_cents_delta, meta)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id",
    )
    .bind(entry.client_id.get())
    .bind(entry.entry_type.as_str())
    .bind(entry.credits_delta)
    .bind(entry.price_cents_delta)
    .bind(&entry.meta)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        StoreError::database(
            format!("append {} ledger entry for client {}", entry.entry_type, entry.client_id),
            e,
        )
    })?;
    Ok(LedgerEntryId::from_raw(id))
}

/// Take one line's quantity from plan stock. Returns the plan's credit yield.
async fn take_stock(conn: &mut PgConnection, item: &OrderItem) -> Result<i64> {
    let taken = sqlx::query_scalar::<_, i64>(
        "UPDATE plans SET stock = stock - $2
         WHERE id = $1 AND stock >= $2
         RETURNING amount_credits",
    )
    .bind(item.plan_id.get())
    .bind(item.quantity)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| StoreError::database(format!("take stock of plan {}", item.plan_id), e))?;

    if let Some(amount_credits) = taken {
        return Ok(amount_credits);
    }

    let available = sqlx::query_scalar::<_, i32>("SELECT stock FROM plans WHERE id = $1")
        .bind(item.plan_id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StoreError::database(format!("read stock of plan {}", item.plan_id), e))?
        .ok_or_else(|| StoreError::not_found("plan", item.plan_id))?;

    Err(BillingError::InsufficientStock {
        plan_id: item.plan_id,
        available,
        requested: item.quantity,
    }
    .into())
}

// ============================================================================
// Store implementation
// ============================================================================

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn get_client(&self, id: ClientId) -> Result<Client> {
        sqlx::query_as::<_, ClientRow>(
            "SELECT id, name, email, status, supports_flamengo, watches_one_piece, city,
                    registered_at
             FROM clients WHERE id = $1 AND status = TRUE",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("get client {id}"), e))?
        .map(Client::from)
        .ok_or_else(|| StoreError::not_found("client", id))
    }

    async fn get_seller(&self, id: SellerId) -> Result<Seller> {
        sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM sellers WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database(format!("get seller {id}"), e))?
            .map(|(id, name)| Seller {
                id: SellerId::from_raw(id),
                name,
            })
            .ok_or_else(|| StoreError::not_found("seller", id))
    }

    async fn get_plan(&self, id: PlanId) -> Result<Plan> {
        sqlx::query_as::<_, PlanRow>(
            "SELECT id, plan_name, price_cents, amount_credits, stock, category, status
             FROM plans WHERE id = $1 AND status = TRUE",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("get plan {id}"), e))?
        .map(Plan::from)
        .ok_or_else(|| StoreError::not_found("plan", id))
    }

    async fn get_balance(&self, client_id: ClientId) -> Result<Wallet> {
        self.bounded("get balance", async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| StoreError::database("acquire connection", e))?;
            ensure_wallet(&mut conn, client_id).await?;

            let balance_credits = sqlx::query_scalar::<_, i64>(
                "SELECT balance_credits FROM wallets WHERE client_id = $1",
            )
            .bind(client_id.get())
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| wallet_error(client_id, "read wallet", e))?;

            Ok(Wallet {
                client_id,
                balance_credits,
            })
        })
        .await
    }

    async fn credit(
        &self,
        client_id: ClientId,
        credits: i64,
        price_cents_delta: i64,
        meta: serde_json::Value,
    ) -> Result<i64> {
        let entry = NewLedgerEntry::topup(client_id, credits, price_cents_delta, meta)?;

        self.bounded("credit wallet", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StoreError::database("begin credit", e))?;

            let balance = add_to_wallet(&mut tx, client_id, credits).await?;
            insert_ledger(&mut tx, &entry).await?;

            tx.commit().await.map_err(|e| {
                StoreError::database(format!("commit credit for client {client_id}"), e)
            })?;

            tracing::info!(
                client_id = %client_id,
                credits,
                new_balance = balance,
                "Wallet credited"
            );
            Ok(balance)
        })
        .await
    }

    async fn debit(&self, debit: &UsageDebit) -> Result<i64> {
        let entry = debit.ledger_entry()?;
        let client_id = debit.client_id;

        self.bounded("debit wallet", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StoreError::database("begin debit", e))?;

            ensure_wallet(&mut tx, client_id).await?;
            let balance_credits = sqlx::query_scalar::<_, i64>(
                "SELECT balance_credits FROM wallets WHERE client_id = $1 FOR UPDATE",
            )
            .bind(client_id.get())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| wallet_error(client_id, "lock wallet", e))?;

            let new_balance = Wallet {
                client_id,
                balance_credits,
            }
            .debit_preview(debit.credits)?;

            sqlx::query(
                "INSERT INTO usage_events
                     (client_id, model, prompt_tokens, completion_tokens, credits_spent)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(client_id.get())
            .bind(&debit.model)
            .bind(debit.prompt_tokens)
            .bind(debit.completion_tokens)
            .bind(debit.credits)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                StoreError::database(format!("record usage for client {client_id}"), e)
            })?;

            insert_ledger(&mut tx, &entry).await?;

            sqlx::query("UPDATE wallets SET balance_credits = $2 WHERE client_id = $1")
                .bind(client_id.get())
                .bind(new_balance)
                .execute(&mut *tx)
                .await
                .map_err(|e| wallet_error(client_id, "debit wallet", e))?;

            tx.commit().await.map_err(|e| {
                StoreError::database(format!("commit debit for client {client_id}"), e)
            })?;

            tracing::info!(
                client_id = %client_id,
                model = %debit.model,
                credits = debit.credits,
                new_balance,
                "Wallet debited"
            );
            Ok(new_balance)
        })
        .await
    }

    async fn list_ledger(
        &self,
        client_id: ClientId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditLedgerEntry>> {
        let (limit, offset) = clamp_page(limit, offset);

        sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {LEDGER_COLUMNS}
             FROM credit_ledger
             WHERE client_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(client_id.get())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("list ledger for client {client_id}"), e))?
        .into_iter()
        .map(CreditLedgerEntry::try_from)
        .collect()
    }

    async fn reconcile(&self, client_id: ClientId) -> Result<Reconciliation> {
        // One statement, one snapshot.
        let (balance_credits, ledger_sum) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT
                COALESCE((SELECT balance_credits FROM wallets WHERE client_id = $1), 0),
                COALESCE(
                    (SELECT SUM(credits_delta) FROM credit_ledger WHERE client_id = $1), 0
                )::BIGINT",
        )
        .bind(client_id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("reconcile client {client_id}"), e))?;

        Ok(Reconciliation {
            client_id,
            balance_credits,
            ledger_sum,
        })
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order> {
        self.bounded("create order", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StoreError::database("begin create order", e))?;

            let client_exists = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM clients WHERE id = $1 AND status = TRUE",
            )
            .bind(order.client_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::database(format!("look up client {}", order.client_id), e))?;
            if client_exists.is_none() {
                return Err(StoreError::not_found("client", order.client_id));
            }

            let seller_exists =
                sqlx::query_scalar::<_, i64>("SELECT id FROM sellers WHERE id = $1")
                    .bind(order.seller_id.get())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| {
                        StoreError::database(format!("look up seller {}", order.seller_id), e)
                    })?;
            if seller_exists.is_none() {
                return Err(StoreError::not_found("seller", order.seller_id));
            }

            let mut priced = Vec::with_capacity(order.items.len());
            let mut subtotal_cents = 0_i64;
            for item in &order.items {
                let (price_cents, stock) = sqlx::query_as::<_, (i64, i32)>(
                    "SELECT price_cents, stock FROM plans WHERE id = $1 AND status = TRUE",
                )
                .bind(item.plan_id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::database(format!("look up plan {}", item.plan_id), e))?
                .ok_or_else(|| StoreError::not_found("plan", item.plan_id))?;

                check_stock(item.plan_id, stock, item.quantity)?;
                let line = line_total(item.plan_id, price_cents, item.quantity)?;
                subtotal_cents = accumulate(subtotal_cents, line, "order subtotal")?;
                priced.push((item, price_cents));
            }

            let row = sqlx::query_as::<_, OrderRow>(&format!(
                "INSERT INTO orders (client_id, seller_id, payment_method, payment_status,
                                     subtotal_cents, discount_cents, total_cents)
                 VALUES ($1, $2, $3, 'PENDING', $4, 0, $4)
                 RETURNING {ORDER_COLUMNS}"
            ))
            .bind(order.client_id.get())
            .bind(order.seller_id.get())
            .bind(order.payment_method.as_str())
            .bind(subtotal_cents)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::database("insert order", e))?;

            let mut items = Vec::with_capacity(priced.len());
            for (item, unit_price_cents) in priced {
                let inserted = sqlx::query_as::<_, OrderItemRow>(
                    "INSERT INTO order_items (order_id, plan_id, quantity, unit_price_cents)
                     VALUES ($1, $2, $3, $4)
                     RETURNING id, order_id, plan_id, quantity, unit_price_cents",
                )
                .bind(row.id)
                .bind(item.plan_id.get())
                .bind(item.quantity)
                .bind(unit_price_cents)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    StoreError::database(format!("insert item for order {}", row.id), e)
                })?;
                items.push(OrderItem::from(inserted));
            }

            tx.commit()
                .await
                .map_err(|e| StoreError::database("commit create order", e))?;

            let created = row.into_order(items)?;
            tracing::info!(
                order_id = %created.id,
                client_id = %created.client_id,
                subtotal_cents = created.subtotal_cents,
                "Order created"
            );
            Ok(created)
        })
        .await
    }

    async fn get_order(&self, id: OrderId) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("get order {id}"), e))?
        .ok_or_else(|| StoreError::not_found("order", id))?;

        let items = self
            .load_items(&[row.id])
            .await?
            .remove(&row.id)
            .unwrap_or_default();
        row.into_order(items)
    }

    async fn list_orders_by_client(&self, client_id: ClientId) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE client_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(client_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("list orders for client {client_id}"), e))?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut items = self.load_items(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let lines = items.remove(&row.id).unwrap_or_default();
                row.into_order(lines)
            })
            .collect()
    }

    async fn finalize_order(
        &self,
        id: OrderId,
        policy: &dyn DiscountPolicy,
    ) -> Result<FinalizedOrder> {
        let result = self
            .bounded("finalize order", self.finalize_in_tx(id, policy))
            .await;

        if let Err(StoreError::Billing(BillingError::InsufficientStock { plan_id, .. })) = &result {
            tracing::warn!(
                order_id = %id,
                plan_id = %plan_id,
                "Finalize rejected: insufficient stock"
            );
            sqlx::query(
                "UPDATE orders SET payment_status = 'FAILED'
                 WHERE id = $1 AND payment_status = 'PENDING'",
            )
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database(format!("mark order {id} failed"), e))?;
        }

        result
    }

    async fn list_active_pricing(&self) -> Result<Vec<ModelPricing>> {
        let rows = sqlx::query_as::<_, PricingRow>(&format!(
            "SELECT {PRICING_COLUMNS}
             FROM model_pricing
             WHERE active = TRUE
             ORDER BY priority ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database("list active pricing", e))?;

        Ok(rows.into_iter().map(ModelPricing::from).collect())
    }

    async fn upsert_pricing(&self, rule: PricingRuleInput) -> Result<ModelPricing> {
        let rule = rule.validate()?;
        let priority = rule.priority_or_default();
        let active = rule.active_or_default();

        let row = if let Some(id) = rule.id {
            sqlx::query_as::<_, PricingRow>(&format!(
                "UPDATE model_pricing
                 SET pattern = $2, credits_per_1k_prompt = $3, credits_per_1k_completion = $4,
                     priority = $5, active = $6, updated_at = NOW()
                 WHERE id = $1
                 RETURNING {PRICING_COLUMNS}"
            ))
            .bind(id)
            .bind(&rule.pattern)
            .bind(rule.credits_per_1k_prompt)
            .bind(rule.credits_per_1k_completion)
            .bind(priority)
            .bind(active)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database(format!("update pricing rule {id}"), e))?
            .ok_or_else(|| StoreError::not_found("pricing rule", id))?
        } else {
            sqlx::query_as::<_, PricingRow>(&format!(
                "INSERT INTO model_pricing
                     (pattern, credits_per_1k_prompt, credits_per_1k_completion, priority, active)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING {PRICING_COLUMNS}"
            ))
            .bind(&rule.pattern)
            .bind(rule.credits_per_1k_prompt)
            .bind(rule.credits_per_1k_completion)
            .bind(priority)
            .bind(active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::database("insert pricing rule", e))?
        };

        tracing::info!(rule_id = row.id, pattern = %row.pattern, "Pricing rule saved");
        Ok(row.into())
    }

    async fn seller_monthly_sales(
        &self,
        month: Option<DateTime<Utc>>,
    ) -> Result<Vec<SellerMonthlySales>> {
        let rows = sqlx::query_as::<_, SalesRow>(
            "SELECT month, seller_id, orders_count, total_cents
             FROM seller_monthly_sales
             WHERE $1::timestamptz IS NULL OR month = $1
             ORDER BY month DESC, seller_id ASC",
        )
        .bind(month.map(month_start))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database("query seller monthly sales", e))?;

        Ok(rows
            .into_iter()
            .map(|row| SellerMonthlySales {
                month: row.month,
                seller_id: SellerId::from_raw(row.seller_id),
                orders_count: row.orders_count,
                total_cents: row.total_cents,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    //! Live tests against PostgreSQL.
    //!
    //! Run with: `DATABASE_URL=postgres://... cargo test -p credit-ledger-store -- --ignored`

    use std::sync::Arc;

    use super::*;
    use credit_ledger_core::{NewOrderItem, RuleTablePolicy};

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgStore::connect(&url, 5, Duration::from_secs(5))
            .await
            .expect("connect");
        store.migrate().await.expect("migrate");
        store
    }

    async fn seed_client(store: &PgStore) -> ClientId {
        let email = format!("{}@example.com", uuid_like());
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO clients (name, email, supports_flamengo)
             VALUES ('live', $1, TRUE) RETURNING id",
        )
        .bind(email)
        .fetch_one(store.pool())
        .await
        .expect("insert client");
        ClientId::from_raw(id)
    }

    async fn seed_plan(store: &PgStore, stock: i32) -> PlanId {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO plans (plan_name, price_cents, amount_credits, stock)
             VALUES ($1, 500, 40, $2) RETURNING id",
        )
        .bind(format!("plan-{}", uuid_like()))
        .bind(stock)
        .fetch_one(store.pool())
        .await
        .expect("insert plan");
        PlanId::from_raw(id)
    }

    fn uuid_like() -> String {
        format!("{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires DATABASE_URL"]
    async fn concurrent_debits_never_overdraw() {
        let store = Arc::new(store().await);
        let client = seed_client(&store).await;
        store.credit(client, 10, 0, serde_json::json!({})).await.unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let debit = UsageDebit::new(client, "live", 1, 1, 6).unwrap();
                    store.debit(&debit).await
                })
            })
            .collect();

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.get_balance(client).await.unwrap().balance_credits, 4);
        assert!(store.reconcile(client).await.unwrap().is_consistent());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn finalize_round_trip() {
        let store = store().await;
        let client = seed_client(&store).await;
        let plan = seed_plan(&store, 2).await;

        let order = store
            .create_order(&NewOrder {
                client_id: client,
                seller_id: SellerId::from_raw(1),
                payment_method: PaymentMethod::Card,
                items: vec![NewOrderItem {
                    plan_id: plan,
                    quantity: 2,
                }],
            })
            .await
            .unwrap();

        let done = store
            .finalize_order(order.id, &RuleTablePolicy::default())
            .await
            .unwrap();
        assert_eq!(done.order.discount_cents, 100);
        assert_eq!(done.wallet_balance, 80);
        assert_eq!(store.get_plan(plan).await.unwrap().stock, 0);

        let again = store
            .finalize_order(order.id, &RuleTablePolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(
            again,
            StoreError::Billing(BillingError::InvalidTransition { .. })
        ));
    }

    fn order_of(client: ClientId, lines: &[(PlanId, i32)]) -> NewOrder {
        NewOrder {
            client_id: client,
            seller_id: SellerId::from_raw(1),
            payment_method: PaymentMethod::Pix,
            items: lines
                .iter()
                .map(|&(plan_id, quantity)| NewOrderItem { plan_id, quantity })
                .collect(),
        }
    }

    async fn set_stock(store: &PgStore, plan: PlanId, stock: i32) {
        sqlx::query("UPDATE plans SET stock = $2 WHERE id = $1")
            .bind(plan.get())
            .bind(stock)
            .execute(store.pool())
            .await
            .expect("set stock");
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn failed_finalize_rolls_back_earlier_lines() {
        let store = store().await;
        let client = seed_client(&store).await;
        let plenty = seed_plan(&store, 5).await;
        let scarce = seed_plan(&store, 3).await;

        let order = store
            .create_order(&order_of(client, &[(plenty, 2), (scarce, 3)]))
            .await
            .unwrap();
        set_stock(&store, scarce, 1).await;

        let err = store
            .finalize_order(order.id, &RuleTablePolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Billing(BillingError::InsufficientStock {
                plan_id,
                available: 1,
                requested: 3,
            }) if plan_id == scarce
        ));

        assert_eq!(store.get_plan(plenty).await.unwrap().stock, 5);
        assert_eq!(store.get_plan(scarce).await.unwrap().stock, 1);
        assert!(store.list_ledger(client, 10, 0).await.unwrap().is_empty());
        let books = store.reconcile(client).await.unwrap();
        assert_eq!((books.balance_credits, books.ledger_sum), (0, 0));
        assert_eq!(
            store.get_order(order.id).await.unwrap().payment_status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn ledger_is_newest_first_and_paginated() {
        let store = store().await;
        let client = seed_client(&store).await;
        for credits in 1..=3 {
            store.credit(client, credits, 0, serde_json::json!({})).await.unwrap();
        }

        let page = store.list_ledger(client, 2, 0).await.unwrap();
        let deltas: Vec<i64> = page.iter().map(|e| e.credits_delta).collect();
        assert_eq!(deltas, vec![3, 2]);
        assert!(page.iter().all(|e| e.entry_type == LedgerEntryType::Topup));

        let rest = store.list_ledger(client, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].credits_delta, 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn rejected_debit_leaves_books_consistent() {
        let store = store().await;
        let client = seed_client(&store).await;
        store.credit(client, 5, 0, serde_json::json!({})).await.unwrap();

        let debit = UsageDebit::new(client, "live", 1, 1, 9).unwrap();
        let err = store.debit(&debit).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Billing(BillingError::InsufficientCredits {
                balance: 5,
                required: 9
            })
        ));

        let books = store.reconcile(client).await.unwrap();
        assert!(books.is_consistent());
        assert_eq!(books.balance_credits, 5);
        assert_eq!(store.list_ledger(client, 10, 0).await.unwrap().len(), 1);

        let events = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM usage_events WHERE client_id = $1",
        )
        .bind(client.get())
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(events, 0);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn deadline_rolls_back_the_transaction() {
        let store = store().await;
        let client = seed_client(&store).await;
        let slow = PgStore::new(store.pool().clone(), Duration::from_millis(1));

        let result: Result<()> = slow
            .bounded("slow credit", async {
                let mut tx = slow
                    .pool
                    .begin()
                    .await
                    .map_err(|e| StoreError::database("begin", e))?;
                add_to_wallet(&mut tx, client, 7).await?;
                let entry = NewLedgerEntry::topup(client, 7, 0, serde_json::json!({}))?;
                insert_ledger(&mut tx, &entry).await?;
                sqlx::query("SELECT pg_sleep(1)")
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StoreError::database("sleep", e))?;
                tx.commit()
                    .await
                    .map_err(|e| StoreError::database("commit", e))?;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(StoreError::Timeout {
                operation: "slow credit"
            })
        ));
        let books = store.reconcile(client).await.unwrap();
        assert_eq!((books.balance_credits, books.ledger_sum), (0, 0));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn soft_deleted_rows_are_not_found() {
        let store = store().await;
        let retired = seed_client(&store).await;
        let active = seed_client(&store).await;
        let plan = seed_plan(&store, 5).await;
        let withdrawn = seed_plan(&store, 5).await;
        sqlx::query("UPDATE clients SET status = FALSE WHERE id = $1")
            .bind(retired.get())
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE plans SET status = FALSE WHERE id = $1")
            .bind(withdrawn.get())
            .execute(store.pool())
            .await
            .unwrap();

        assert!(matches!(
            store.get_client(retired).await.unwrap_err(),
            StoreError::NotFound { entity: "client", .. }
        ));
        assert!(matches!(
            store.get_plan(withdrawn).await.unwrap_err(),
            StoreError::NotFound { entity: "plan", .. }
        ));
        assert!(matches!(
            store.create_order(&order_of(retired, &[(plan, 1)])).await.unwrap_err(),
            StoreError::NotFound { entity: "client", .. }
        ));
        assert!(matches!(
            store
                .create_order(&order_of(active, &[(plan, 1), (withdrawn, 1)]))
                .await
                .unwrap_err(),
            StoreError::NotFound { entity: "plan", .. }
        ));
        assert!(store.list_orders_by_client(active).await.unwrap().is_empty());
    }
}
