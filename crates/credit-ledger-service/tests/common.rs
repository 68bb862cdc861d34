//! Common test utilities for credit-ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::TestServer;
use serde_json::{json, Value};

use credit_ledger_core::{Client, ClientId, Plan, PlanId, Seller, SellerId};
use credit_ledger_service::{create_router, AppState, ServiceConfig};
use credit_ledger_store::{MemoryStore, Store};

/// A client with no discount flags.
pub const PLAIN_CLIENT: i64 = 1;
/// A client who supports Flamengo (10% discount).
pub const FLAMENGO_CLIENT: i64 = 2;
/// A client living in Sousa (10% discount).
pub const SOUSA_CLIENT: i64 = 3;
/// A client id nothing is stored under.
pub const MISSING_CLIENT: i64 = 999;
/// A soft-deleted client (`status = false`).
pub const RETIRED_CLIENT: i64 = 4;

/// The seeded seller.
pub const SELLER: i64 = 1;

/// 1000 cents for 100 credits, plenty of stock.
pub const STARTER_PLAN: i64 = 1;
/// 500 cents for 50 credits, only 3 in stock.
pub const LIMITED_PLAN: i64 = 2;
/// A soft-deleted plan (`status = false`) that still has stock.
pub const WITHDRAWN_PLAN: i64 = 3;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server, for seeding and direct inspection.
    pub store: Arc<MemoryStore>,
}

impl TestHarness {
    /// Create a harness over a freshly seeded in-memory store.
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;

        let state = AppState::new(store.clone(), ServiceConfig::default());
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self { server, store }
    }

    /// The header pair granting the employee role.
    pub fn employee() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-role"),
            HeaderValue::from_static("employee"),
        )
    }

    /// Create a pending order and return its JSON.
    pub async fn create_order(&self, client_id: i64, items: &[(i64, i32)]) -> Value {
        let items: Vec<Value> = items
            .iter()
            .map(|(plan_id, quantity)| json!({ "plan_id": plan_id, "quantity": quantity }))
            .collect();

        let response = self
            .server
            .post("/orders")
            .json(&json!({
                "client_id": client_id,
                "seller_id": SELLER,
                "payment_method": "pix",
                "items": items,
            }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json::<Value>()
    }

    /// Credit a wallet directly through the store.
    pub async fn fund(&self, client_id: i64, credits: i64) -> i64 {
        self.store
            .credit(ClientId::from_raw(client_id), credits, 0, json!({"seed": true}))
            .await
            .expect("Failed to fund wallet")
    }

    /// Current stock of a plan.
    pub async fn stock(&self, plan_id: i64) -> i32 {
        self.store
            .get_plan(PlanId::from_raw(plan_id))
            .await
            .expect("Failed to load plan")
            .stock
    }

    /// Balance reported by the HTTP API.
    pub async fn balance(&self, client_id: i64) -> i64 {
        let response = self.server.get(&format!("/wallets/{client_id}")).await;
        response.assert_status_ok();
        response.json::<Value>()["balance_credits"]
            .as_i64()
            .expect("balance_credits is an integer")
    }
}

async fn seed(store: &MemoryStore) {
    store
        .put_client(Client::new(ClientId::from_raw(PLAIN_CLIENT), "Ana", "ana@example.com"))
        .await;

    let mut fan = Client::new(ClientId::from_raw(FLAMENGO_CLIENT), "Bruno", "bruno@example.com");
    fan.supports_flamengo = true;
    store.put_client(fan).await;

    let mut local = Client::new(ClientId::from_raw(SOUSA_CLIENT), "Carla", "carla@example.com");
    local.city = Some("Sousa".into());
    store.put_client(local).await;

    let mut retired = Client::new(ClientId::from_raw(RETIRED_CLIENT), "Davi", "davi@example.com");
    retired.status = false;
    store.put_client(retired).await;

    store
        .put_seller(Seller {
            id: SellerId::from_raw(SELLER),
            name: "WebStore".into(),
        })
        .await;

    store
        .put_plan(Plan {
            id: PlanId::from_raw(STARTER_PLAN),
            plan_name: "Starter".into(),
            price_cents: 1000,
            amount_credits: 100,
            stock: 100,
            category: "CREDITS".into(),
            status: true,
        })
        .await;
    store
        .put_plan(Plan {
            id: PlanId::from_raw(LIMITED_PLAN),
            plan_name: "Limited".into(),
            price_cents: 500,
            amount_credits: 50,
            stock: 3,
            category: "CREDITS".into(),
            status: true,
        })
        .await;
    store
        .put_plan(Plan {
            id: PlanId::from_raw(WITHDRAWN_PLAN),
            plan_name: "Withdrawn".into(),
            price_cents: 700,
            amount_credits: 70,
            stock: 50,
            category: "CREDITS".into(),
            status: false,
        })
        .await;
}
