//! HTTP surface exercised through the router with in-memory stores.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use pixflow_backend::api::{router, AppState};
use pixflow_backend::config::GatewaySettings;
use pixflow_backend::database::memory::{MemoryGatewayConfigStore, MemoryLedgerStore};
use pixflow_backend::database::models::GatewayConfig;
use pixflow_backend::flow::resolver::FlowGraphResolver;
use pixflow_backend::flow::store::FlowStore;
use pixflow_backend::health::HealthChecker;
use pixflow_backend::payments::factory::GatewayRegistry;
use pixflow_backend::services::ledger::TransactionLedger;
use pixflow_backend::services::notification::LogNotifier;
use pixflow_backend::services::payment_service::PaymentService;
use pixflow_backend::services::webhook_processor::WebhookReconciler;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

fn test_app(dir: &TempDir) -> Router {
    let primary = dir.path().join("flow.json");
    std::fs::write(
        &primary,
        json!({
            "initial_screen": "start",
            "screens": {
                "start": {"text": "Bem-vindo", "buttons": [[{"text": "Pagar", "callback": "goto_pay"}]]},
                "pay": {"type": "payment", "amount": 10, "webhook": "ok"},
                "ok": {"text": "Pago!"}
            }
        })
        .to_string(),
    )
    .unwrap();
    let flows = FlowStore::new(primary, None);

    let ledger_store = Arc::new(MemoryLedgerStore::new());
    let ledger = TransactionLedger::new(ledger_store.clone());
    let registry = Arc::new(GatewayRegistry::new(
        Arc::new(MemoryGatewayConfigStore::new(vec![GatewayConfig {
            id: 1,
            name: "openpix".to_string(),
            is_active: true,
            is_sandbox: true,
            credentials: json!({"app_id": "app-test"}),
            operational_config: json!({}),
        }])),
        GatewaySettings::default(),
    ));

    let reconciler = WebhookReconciler::new(
        ledger.clone(),
        FlowGraphResolver::new(flows.clone()),
        Arc::new(LogNotifier),
    );

    router(AppState {
        payments: Arc::new(PaymentService::new(registry.clone(), ledger)),
        reconciler: Arc::new(reconciler),
        registry,
        flows: flows.clone(),
        health: HealthChecker::new(ledger_store, None, flows),
    })
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_is_ok_when_store_and_flows_are_reachable() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = send(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Healthy");
    assert_eq!(body["checks"]["flows"]["status"], "Up");
}

#[tokio::test]
async fn webhooks_always_answer_ok() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/openpix")
                .body(Body::from("garbage"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "rejected");

    let (status, body) = send(
        &app,
        Method::POST,
        "/webhooks/suitpay",
        Some(json!({"requestNumber": "nothing-here", "statusTransaction": "PAID_OUT", "value": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "not_found");

    let (status, _) = send(&app, Method::POST, "/webhooks/efi/pix", Some(json!({"pix": []}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn payment_for_unregistered_user_is_not_found() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/payments",
        Some(json!({"telegram_id": 7, "amount": "10.00"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn malformed_payment_body_is_a_validation_error() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, _) = send(&app, Method::POST, "/api/payments", Some(json!({"amount": "10.00"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn registered_user_with_invalid_tax_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, user) = send(
        &app,
        Method::POST,
        "/api/users",
        Some(json!({"telegram_id": 7, "first_name": "Bia"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["telegram_id"], 7);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/payments",
        Some(json!({"telegram_id": 7, "amount": "10.00", "payer_tax_id": "123"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_payment_status_is_not_found() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, _) = send(&app, Method::GET, "/api/payments/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn layout_endpoint_returns_positioned_graph() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = send(&app, Method::GET, "/api/flows/layout?document=primary", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 3);
    let edge_ids: Vec<&str> = body["edges"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|edge| edge["id"].as_str())
        .collect();
    assert!(edge_ids.contains(&"e-start-pay-0"));
    assert!(edge_ids.contains(&"wh-pay-ok"));
}

#[tokio::test]
async fn flow_documents_can_be_replaced_but_not_the_merged_view() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);
    let replacement = json!({"screens": {"only": {"text": "Único"}}});

    let (status, _) = send(&app, Method::PUT, "/api/flows/merged", Some(replacement.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::PUT, "/api/flows/campaign", Some(replacement.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, layout) = send(&app, Method::PUT, "/api/flows/primary", Some(replacement)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(layout["nodes"][0]["id"], "only");

    let (status, document) = send(&app, Method::GET, "/api/flows/primary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(document["screens"]["only"]["text"], "Único");

    let (status, _) = send(&app, Method::GET, "/api/flows/elsewhere", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn gateway_webhook_registration() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = send(&app, Method::POST, "/api/gateways/openpix/webhook", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["webhook_url"], "http://localhost:8000/webhooks/openpix");

    let (status, _) = send(&app, Method::POST, "/api/gateways/suitpay/webhook", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
