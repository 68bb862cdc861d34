//! Pricing rule management integration tests.

mod common;

use axum::http::StatusCode;
use common::{TestHarness, PLAIN_CLIENT};
use serde_json::{json, Value};

async fn save_rule(harness: &TestHarness, rule: Value) -> Value {
    let (name, value) = TestHarness::employee();
    let response = harness
        .server
        .post("/pricing")
        .add_header(name, value)
        .json(&rule)
        .await;
    response.assert_status_ok();
    response.json()
}

#[tokio::test]
async fn list_is_empty_without_rules() {
    let harness = TestHarness::new().await;

    let response = harness.server.get("/pricing").await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!([]));
}

#[tokio::test]
async fn upsert_requires_employee_role() {
    let harness = TestHarness::new().await;

    let response = harness
        .server
        .post("/pricing")
        .json(&json!({
            "pattern": "^gpt",
            "credits_per_1k_prompt": 1.0,
            "credits_per_1k_completion": 1.0,
        }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["code"], "FORBIDDEN");
}

#[tokio::test]
async fn insert_fills_defaults_and_prices_usage() {
    let harness = TestHarness::new().await;
    harness.fund(PLAIN_CLIENT, 100).await;

    let rule = save_rule(
        &harness,
        json!({
            "pattern": "^gpt-4",
            "credits_per_1k_prompt": 10.0,
            "credits_per_1k_completion": 30.0,
        }),
    )
    .await;
    assert!(rule["id"].as_i64().is_some());
    assert_eq!(rule["priority"], 100);
    assert_eq!(rule["active"], true);

    let response = harness
        .server
        .post("/usage")
        .json(&json!({
            "client_id": PLAIN_CLIENT,
            "model": "gpt-4o",
            "prompt_tokens": 1000,
            "completion_tokens": 100,
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["credits_spent"], 13);
    assert_eq!(body["balance_credits"], 87);
}

#[tokio::test]
async fn lowest_priority_rule_wins() {
    let harness = TestHarness::new().await;

    save_rule(
        &harness,
        json!({ "pattern": "^gemma", "credits_per_1k_prompt": 2.0,
                "credits_per_1k_completion": 2.0, "priority": 100 }),
    )
    .await;
    save_rule(
        &harness,
        json!({ "pattern": "^gemma3", "credits_per_1k_prompt": 0.5,
                "credits_per_1k_completion": 1.5, "priority": 10 }),
    )
    .await;

    let rules: Vec<Value> = harness.server.get("/pricing").await.json();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0]["pattern"], "^gemma3");

    let quote: Value = harness
        .server
        .get("/pricing/quote")
        .add_query_param("model", "gemma3:1b")
        .add_query_param("prompt_tokens", 1000)
        .add_query_param("completion_tokens", 1000)
        .await
        .json();
    assert_eq!(quote["prompt_rate"], 0.5);
    assert_eq!(quote["completion_rate"], 1.5);
    assert_eq!(quote["credits"], 2);

    let quote: Value = harness
        .server
        .get("/pricing/quote")
        .add_query_param("model", "gemma2:9b")
        .add_query_param("prompt_tokens", 1000)
        .await
        .json();
    assert_eq!(quote["credits"], 2);
}

#[tokio::test]
async fn deactivated_rule_falls_back_to_default_rates() {
    let harness = TestHarness::new().await;

    let rule = save_rule(
        &harness,
        json!({ "pattern": ".*", "credits_per_1k_prompt": 9.0,
                "credits_per_1k_completion": 9.0 }),
    )
    .await;

    let updated = save_rule(
        &harness,
        json!({ "id": rule["id"], "pattern": ".*", "credits_per_1k_prompt": 9.0,
                "credits_per_1k_completion": 9.0, "active": false }),
    )
    .await;
    assert_eq!(updated["id"], rule["id"]);
    assert_eq!(updated["active"], false);

    let rules: Vec<Value> = harness.server.get("/pricing").await.json();
    assert!(rules.is_empty());

    let quote: Value = harness
        .server
        .get("/pricing/quote")
        .add_query_param("model", "anything")
        .add_query_param("prompt_tokens", 500)
        .await
        .json();
    assert_eq!(quote["prompt_rate"], 1.0);
    assert_eq!(quote["credits"], 1);
}

#[tokio::test]
async fn invalid_rules_are_rejected() {
    let harness = TestHarness::new().await;
    let (name, value) = TestHarness::employee();

    let cases = [
        (
            json!({ "pattern": "(unclosed", "credits_per_1k_prompt": 1.0,
                    "credits_per_1k_completion": 1.0 }),
            StatusCode::BAD_REQUEST,
            "INVALID_PATTERN",
        ),
        (
            json!({ "pattern": "  ", "credits_per_1k_prompt": 1.0,
                    "credits_per_1k_completion": 1.0 }),
            StatusCode::BAD_REQUEST,
            "INVALID_PATTERN",
        ),
        (
            json!({ "pattern": "^x", "credits_per_1k_prompt": 0.0,
                    "credits_per_1k_completion": 1.0 }),
            StatusCode::BAD_REQUEST,
            "INVALID_RATE",
        ),
        (
            json!({ "id": 9999, "pattern": "^x", "credits_per_1k_prompt": 1.0,
                    "credits_per_1k_completion": 1.0 }),
            StatusCode::NOT_FOUND,
            "PRICING_RULE_NOT_FOUND",
        ),
    ];

    for (rule, status, code) in cases {
        let response = harness
            .server
            .post("/pricing")
            .add_header(name.clone(), value.clone())
            .json(&rule)
            .await;
        response.assert_status(status);
        assert_eq!(response.json::<Value>()["code"], code);
    }
}
