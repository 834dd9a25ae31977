use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::info;

use crate::api::AppState;
use crate::payments::types::GatewayName;
use crate::services::webhook_processor::WebhookOutcome;

/// Gateways retry on anything but 200, so every outcome is acknowledged.
async fn acknowledge(state: &AppState, gateway: GatewayName, body: &[u8]) -> impl IntoResponse {
    info!(gateway = %gateway, bytes = body.len(), "Received webhook");

    let outcome: WebhookOutcome = state.reconciler.handle(gateway, body).await;

    info!(gateway = %gateway, outcome = %outcome, "Webhook handled");
    (StatusCode::OK, Json(json!({ "status": outcome.as_str() })))
}

/// POST /webhooks/efi and /webhooks/efi/pix
pub async fn efi(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    acknowledge(&state, GatewayName::Efi, &body).await
}

/// POST /webhooks/suitpay
pub async fn suitpay(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    acknowledge(&state, GatewayName::SuitPay, &body).await
}

/// POST /webhooks/openpix
pub async fn openpix(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    acknowledge(&state, GatewayName::OpenPix, &body).await
}
