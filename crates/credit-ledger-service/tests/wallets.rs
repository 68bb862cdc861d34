//! Wallet balance, ledger, top-up and reconciliation integration tests.

mod common;

use axum::http::StatusCode;
use common::{
    TestHarness, FLAMENGO_CLIENT, MISSING_CLIENT, PLAIN_CLIENT, STARTER_PLAN, WITHDRAWN_PLAN,
};
use serde_json::{json, Value};

// ============================================================================
// Balance
// ============================================================================

#[tokio::test]
async fn wallet_is_created_on_first_access() {
    let harness = TestHarness::new().await;

    let response = harness.server.get(&format!("/wallets/{PLAIN_CLIENT}")).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["client_id"], PLAIN_CLIENT);
    assert_eq!(body["balance_credits"], 0);
}

#[tokio::test]
async fn wallet_for_unknown_client_is_not_found() {
    let harness = TestHarness::new().await;

    let response = harness.server.get(&format!("/wallets/{MISSING_CLIENT}")).await;
    response.assert_status_not_found();
    assert_eq!(response.json::<Value>()["code"], "WALLET_NOT_FOUND");
}

#[tokio::test]
async fn wallet_path_must_be_a_positive_integer() {
    let harness = TestHarness::new().await;

    for raw in ["abc", "0", "-4"] {
        let response = harness.server.get(&format!("/wallets/{raw}")).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["code"], "INVALID_CLIENT_ID");
    }
}

// ============================================================================
// Top-ups
// ============================================================================

#[tokio::test]
async fn top_up_by_plan() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .post(&format!("/wallets/{PLAIN_CLIENT}/topups"))
        .json(&json!({ "plan_id": STARTER_PLAN, "request_id": "req-1" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["client_id"], PLAIN_CLIENT);
    assert_eq!(body["balance_credits"], 100);
    assert_eq!(body["added_credits"], 100);
    assert_eq!(body["cost_cents"], 1000);

    // Top-ups never consume plan stock
    assert_eq!(harness.stock(STARTER_PLAN).await, 100);

    let entries: Vec<Value> = harness
        .server
        .get(&format!("/wallets/{PLAIN_CLIENT}/ledger"))
        .await
        .json();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["type"], "TOPUP");
    assert_eq!(entries[0]["price_cents_delta"], 1000);
    assert_eq!(entries[0]["meta"]["request_id"], "req-1");
    assert_eq!(entries[0]["meta"]["type"], "plan_purchase");
    assert_eq!(entries[0]["meta"]["plan_id"], STARTER_PLAN);
}

#[tokio::test]
async fn top_up_generates_request_id() {
    let harness = TestHarness::new().await;

    harness
        .server
        .post(&format!("/wallets/{PLAIN_CLIENT}/topups"))
        .json(&json!({ "plan_id": STARTER_PLAN }))
        .await
        .assert_status_ok();

    let entries: Vec<Value> = harness
        .server
        .get(&format!("/wallets/{PLAIN_CLIENT}/ledger"))
        .await
        .json();
    let request_id = entries[0]["meta"]["request_id"]
        .as_str()
        .expect("request_id is a string");
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

#[tokio::test]
async fn top_up_missing_plan_or_client() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .post(&format!("/wallets/{PLAIN_CLIENT}/topups"))
        .json(&json!({ "plan_id": 77 }))
        .await;
    response.assert_status_not_found();
    assert_eq!(response.json::<Value>()["code"], "PLAN_NOT_FOUND");

    let response = harness
        .server
        .post(&format!("/wallets/{MISSING_CLIENT}/topups"))
        .json(&json!({ "plan_id": STARTER_PLAN }))
        .await;
    response.assert_status_not_found();
    assert_eq!(response.json::<Value>()["code"], "WALLET_NOT_FOUND");
}

#[tokio::test]
async fn top_up_with_withdrawn_plan_is_not_found() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .post(&format!("/wallets/{PLAIN_CLIENT}/topups"))
        .json(&json!({ "plan_id": WITHDRAWN_PLAN }))
        .await;
    response.assert_status_not_found();
    assert_eq!(response.json::<Value>()["code"], "PLAN_NOT_FOUND");
    assert_eq!(harness.balance(PLAIN_CLIENT).await, 0);
}

// ============================================================================
// Ledger
// ============================================================================

#[tokio::test]
async fn ledger_is_newest_first_and_paginated() {
    let harness = TestHarness::new().await;

    for request_id in ["a", "b", "c"] {
        harness
            .server
            .post(&format!("/wallets/{PLAIN_CLIENT}/topups"))
            .json(&json!({ "plan_id": STARTER_PLAN, "request_id": request_id }))
            .await
            .assert_status_ok();
    }

    let all: Vec<Value> = harness
        .server
        .get(&format!("/wallets/{PLAIN_CLIENT}/ledger"))
        .await
        .json();
    let order: Vec<&str> = all
        .iter()
        .filter_map(|e| e["meta"]["request_id"].as_str())
        .collect();
    assert_eq!(order, ["c", "b", "a"]);

    let page: Vec<Value> = harness
        .server
        .get(&format!("/wallets/{PLAIN_CLIENT}/ledger"))
        .add_query_param("limit", 1)
        .add_query_param("offset", 1)
        .await
        .json();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["meta"]["request_id"], "b");
}

#[tokio::test]
async fn ledger_rejects_malformed_query() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .get(&format!("/wallets/{PLAIN_CLIENT}/ledger"))
        .add_query_param("limit", "many")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "INVALID_REQUEST");
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn reconciliation_requires_employee_role() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .get(&format!("/wallets/{PLAIN_CLIENT}/reconciliation"))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["code"], "FORBIDDEN");

    let response = harness
        .server
        .get(&format!("/wallets/{PLAIN_CLIENT}/reconciliation"))
        .add_header(
            axum::http::HeaderName::from_static("x-role"),
            axum::http::HeaderValue::from_static("client"),
        )
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn balance_matches_ledger_after_mixed_activity() {
    let harness = TestHarness::new().await;

    harness
        .server
        .post(&format!("/wallets/{FLAMENGO_CLIENT}/topups"))
        .json(&json!({ "plan_id": STARTER_PLAN }))
        .await
        .assert_status_ok();
    let order = harness.create_order(FLAMENGO_CLIENT, &[(STARTER_PLAN, 1)]).await;
    harness
        .server
        .post(&format!("/orders/{}/finalize", order["id"]))
        .await
        .assert_status_ok();
    harness
        .server
        .post("/usage")
        .json(&json!({
            "client_id": FLAMENGO_CLIENT,
            "prompt_tokens": 1500,
            "completion_tokens": 700,
        }))
        .await
        .assert_status_ok();

    let (name, value) = TestHarness::employee();
    let response = harness
        .server
        .get(&format!("/wallets/{FLAMENGO_CLIENT}/reconciliation"))
        .add_header(name, value)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["balance_credits"], 197);
    assert_eq!(body["ledger_sum"], 197);
    assert_eq!(body["consistent"], true);
}
