//! In-process store.
//!
//! All state lives behind one async mutex, so every operation is trivially
//! serializable. Mutating operations stage their changes and only write them
//! back once every check has passed, which gives the same all-or-nothing
//! behavior as a database transaction.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use credit_ledger_core::order::{accumulate, check_stock, line_total};
use credit_ledger_core::report::month_start;
use credit_ledger_core::{
    ledger, Client, ClientId, CreditLedgerEntry, DiscountPolicy, FinalizeTally,
    FinalizedOrder, LedgerEntryId, ModelPricing, NewLedgerEntry, NewOrder, Order, OrderId,
    OrderItem, OrderItemId, PaymentStatus, Plan, PlanId, PricingRuleInput, Reconciliation, Seller,
    SellerId, SellerMonthlySales, Settlement, UsageDebit, UsageEvent, UsageEventId, Wallet,
};

use crate::error::{Result, StoreError};
use crate::{clamp_page, Store};

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<ClientId, Client>,
    sellers: HashMap<SellerId, Seller>,
    plans: HashMap<PlanId, Plan>,
    wallets: HashMap<ClientId, i64>,
    ledger: Vec<CreditLedgerEntry>,
    usage_events: Vec<UsageEvent>,
    orders: BTreeMap<OrderId, Order>,
    pricing: BTreeMap<i64, ModelPricing>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Wallet balance, creating the wallet if the client exists.
    fn wallet_mut(&mut self, client_id: ClientId) -> Result<&mut i64> {
        if !self.clients.contains_key(&client_id) {
            return Err(StoreError::not_found("wallet", client_id));
        }
        Ok(self.wallets.entry(client_id).or_insert(0))
    }

    fn append_ledger(&mut self, entry: NewLedgerEntry) {
        let id = LedgerEntryId::from_raw(self.next_id());
        self.ledger.push(entry.into_entry(id, Utc::now()));
    }
}

/// In-memory implementation of [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a client.
    pub async fn put_client(&self, client: Client) {
        self.inner.lock().await.clients.insert(client.id, client);
    }

    /// Insert or replace a seller.
    pub async fn put_seller(&self, seller: Seller) {
        self.inner.lock().await.sellers.insert(seller.id, seller);
    }

    /// Insert or replace a plan.
    pub async fn put_plan(&self, plan: Plan) {
        self.inner.lock().await.plans.insert(plan.id, plan);
    }

    /// Number of usage events recorded.
    pub async fn usage_event_count(&self) -> usize {
        self.inner.lock().await.usage_events.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get_client(&self, id: ClientId) -> Result<Client> {
        self.inner
            .lock()
            .await
            .clients
            .get(&id)
            .filter(|client| client.status)
            .cloned()
            .ok_or_else(|| StoreError::not_found("client", id))
    }

    async fn get_seller(&self, id: SellerId) -> Result<Seller> {
        self.inner
            .lock()
            .await
            .sellers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("seller", id))
    }

    async fn get_plan(&self, id: PlanId) -> Result<Plan> {
        self.inner
            .lock()
            .await
            .plans
            .get(&id)
            .filter(|plan| plan.status)
            .cloned()
            .ok_or_else(|| StoreError::not_found("plan", id))
    }

    async fn get_balance(&self, client_id: ClientId) -> Result<Wallet> {
        let mut inner = self.inner.lock().await;
        let balance_credits = *inner.wallet_mut(client_id)?;
        Ok(Wallet {
            client_id,
            balance_credits,
        })
    }

    async fn credit(
        &self,
        client_id: ClientId,
        credits: i64,
        price_cents_delta: i64,
        meta: serde_json::Value,
    ) -> Result<i64> {
        let entry = NewLedgerEntry::topup(client_id, credits, price_cents_delta, meta)?;

        let mut inner = self.inner.lock().await;
        let balance = inner.wallet_mut(client_id)?;
        *balance += credits;
        let balance = *balance;
        inner.append_ledger(entry);

        Ok(balance)
    }

    async fn debit(&self, debit: &UsageDebit) -> Result<i64> {
        let entry = debit.ledger_entry()?;

        let mut inner = self.inner.lock().await;
        let client_id = debit.client_id;
        let current = Wallet {
            client_id,
            balance_credits: *inner.wallet_mut(client_id)?,
        };
        let balance = current.debit_preview(debit.credits)?;

        let event_id = UsageEventId::from_raw(inner.next_id());
        inner
            .usage_events
            .push(UsageEvent::from_debit(event_id, debit, Utc::now()));
        inner.append_ledger(entry);
        inner.wallets.insert(client_id, balance);

        Ok(balance)
    }

    async fn list_ledger(
        &self,
        client_id: ClientId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditLedgerEntry>> {
        let (limit, offset) = clamp_page(limit, offset);
        let mut entries: Vec<CreditLedgerEntry> = self
            .inner
            .lock()
            .await
            .ledger
            .iter()
            .filter(|e| e.client_id == client_id)
            .cloned()
            .collect();
        ledger::sort_newest_first(&mut entries);

        Ok(entries
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn reconcile(&self, client_id: ClientId) -> Result<Reconciliation> {
        let inner = self.inner.lock().await;
        let balance_credits = inner.wallets.get(&client_id).copied().unwrap_or(0);
        let ledger_sum = inner
            .ledger
            .iter()
            .filter(|e| e.client_id == client_id)
            .map(|e| e.credits_delta)
            .sum();
        Ok(Reconciliation {
            client_id,
            balance_credits,
            ledger_sum,
        })
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order> {
        let mut inner = self.inner.lock().await;

        if !inner.clients.get(&order.client_id).is_some_and(|c| c.status) {
            return Err(StoreError::not_found("client", order.client_id));
        }
        if !inner.sellers.contains_key(&order.seller_id) {
            return Err(StoreError::not_found("seller", order.seller_id));
        }

        let mut priced = Vec::with_capacity(order.items.len());
        let mut subtotal_cents = 0_i64;
        for item in &order.items {
            let plan = inner
                .plans
                .get(&item.plan_id)
                .filter(|plan| plan.status)
                .ok_or_else(|| StoreError::not_found("plan", item.plan_id))?;
            check_stock(plan.id, plan.stock, item.quantity)?;
            let line = line_total(plan.id, plan.price_cents, item.quantity)?;
            subtotal_cents = accumulate(subtotal_cents, line, "order subtotal")?;
            priced.push((*item, plan.price_cents));
        }

        let order_id = OrderId::from_raw(inner.next_id());
        let mut items = Vec::with_capacity(priced.len());
        for (item, unit_price_cents) in priced {
            items.push(OrderItem {
                id: OrderItemId::from_raw(inner.next_id()),
                order_id,
                plan_id: item.plan_id,
                quantity: item.quantity,
                unit_price_cents,
            });
        }

        let created = Order {
            id: order_id,
            client_id: order.client_id,
            seller_id: order.seller_id,
            created_at: Utc::now(),
            payment_method: order.payment_method,
            payment_status: PaymentStatus::Pending,
            subtotal_cents,
            discount_cents: 0,
            total_cents: subtotal_cents,
            items,
        };

        inner.orders.insert(order_id, created.clone());
        Ok(created)
    }

    async fn get_order(&self, id: OrderId) -> Result<Order> {
        self.inner
            .lock()
            .await
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", id))
    }

    async fn list_orders_by_client(&self, client_id: ClientId) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .inner
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.client_id == client_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn finalize_order(
        &self,
        id: OrderId,
        policy: &dyn DiscountPolicy,
    ) -> Result<FinalizedOrder> {
        let mut inner = self.inner.lock().await;

        let order = inner
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", id))?;
        order.payment_status.transition(PaymentStatus::Confirmed)?;

        let client = inner
            .clients
            .get(&order.client_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("client", order.client_id))?;
        let rate = policy.rate_for(&client);

        // Stage stock changes so a failing line leaves the catalog untouched.
        let mut staged: HashMap<PlanId, i32> = HashMap::new();
        let mut tally = FinalizeTally::default();
        for item in &order.items {
            let (stock, amount_credits) = inner
                .plans
                .get(&item.plan_id)
                .map(|plan| (plan.stock, plan.amount_credits))
                .ok_or_else(|| StoreError::not_found("plan", item.plan_id))?;
            let available = staged.get(&item.plan_id).copied().unwrap_or(stock);

            if let Err(err) = check_stock(item.plan_id, available, item.quantity) {
                if let Some(failed) = inner.orders.get_mut(&id) {
                    failed.payment_status = PaymentStatus::Failed;
                }
                tracing::warn!(
                    order_id = %id,
                    plan_id = %item.plan_id,
                    "Finalize rejected: insufficient stock"
                );
                return Err(err.into());
            }

            staged.insert(item.plan_id, available - item.quantity);
            tally.add_line(item, amount_credits)?;
        }

        let settlement = tally.settle(rate);
        let entry = NewLedgerEntry::topup(
            order.client_id,
            settlement.credits_added,
            settlement.total_cents,
            Settlement::ledger_meta(id),
        )?;

        for (plan_id, stock) in staged {
            if let Some(plan) = inner.plans.get_mut(&plan_id) {
                plan.stock = stock;
            }
        }

        let confirmed = {
            let stored = inner
                .orders
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("order", id))?;
            stored.subtotal_cents = settlement.subtotal_cents;
            stored.discount_cents = settlement.discount_cents;
            stored.total_cents = settlement.total_cents;
            stored.payment_status = PaymentStatus::Confirmed;
            stored.clone()
        };

        let balance = inner.wallet_mut(order.client_id)?;
        *balance += settlement.credits_added;
        let wallet_balance = *balance;
        inner.append_ledger(entry);

        Ok(FinalizedOrder {
            order: confirmed,
            wallet_balance,
        })
    }

    async fn list_active_pricing(&self) -> Result<Vec<ModelPricing>> {
        let mut rules: Vec<ModelPricing> = self
            .inner
            .lock()
            .await
            .pricing
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.priority, r.id));
        Ok(rules)
    }

    async fn upsert_pricing(&self, rule: PricingRuleInput) -> Result<ModelPricing> {
        let rule = rule.validate()?;
        let mut inner = self.inner.lock().await;

        let id = match rule.id {
            Some(id) if inner.pricing.contains_key(&id) => id,
            Some(id) => return Err(StoreError::not_found("pricing rule", id)),
            None => inner.next_id(),
        };

        let stored = ModelPricing {
            id,
            priority: rule.priority_or_default(),
            active: rule.active_or_default(),
            pattern: rule.pattern,
            credits_per_1k_prompt: rule.credits_per_1k_prompt,
            credits_per_1k_completion: rule.credits_per_1k_completion,
            updated_at: Utc::now(),
        };
        inner.pricing.insert(id, stored.clone());
        Ok(stored)
    }

    async fn seller_monthly_sales(
        &self,
        month: Option<DateTime<Utc>>,
    ) -> Result<Vec<SellerMonthlySales>> {
        let month = month.map(month_start);
        let inner = self.inner.lock().await;

        let mut groups: BTreeMap<(DateTime<Utc>, SellerId), (i64, i64)> = BTreeMap::new();
        for order in inner
            .orders
            .values()
            .filter(|o| o.payment_status == PaymentStatus::Confirmed)
        {
            let bucket = month_start(order.created_at);
            if month.is_some_and(|m| m != bucket) {
                continue;
            }
            let group = groups.entry((bucket, order.seller_id)).or_default();
            group.0 += 1;
            group.1 += order.total_cents;
        }

        let mut rows: Vec<SellerMonthlySales> = groups
            .into_iter()
            .map(|((month, seller_id), (orders_count, total_cents))| SellerMonthlySales {
                month,
                seller_id,
                orders_count,
                total_cents,
            })
            .collect();
        rows.sort_by(|a, b| b.month.cmp(&a.month).then(a.seller_id.cmp(&b.seller_id)));
        Ok(rows)
    }
}
