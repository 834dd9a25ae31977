//! HTTP surface: payments, gateway webhooks, flow editor support and health.

pub mod flows;
pub mod gateways;
pub mod payments;
pub mod webhooks;

use crate::flow::store::FlowStore;
use crate::health::HealthChecker;
use crate::payments::factory::GatewayRegistry;
use crate::services::payment_service::PaymentService;
use crate::services::webhook_processor::WebhookReconciler;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub registry: Arc<GatewayRegistry>,
    pub flows: FlowStore,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users", post(payments::register_user))
        .route("/api/payments", post(payments::create_payment))
        .route("/api/payments/{correlation_id}", get(payments::payment_status))
        .route("/webhooks/efi", post(webhooks::efi))
        .route("/webhooks/efi/pix", post(webhooks::efi))
        .route("/webhooks/suitpay", post(webhooks::suitpay))
        .route("/webhooks/openpix", post(webhooks::openpix))
        .route("/api/flows/layout", get(flows::layout))
        .route(
            "/api/flows/{document}",
            get(flows::get_document).put(flows::put_document),
        )
        .route("/api/gateways/{name}/webhook", post(gateways::register_webhook))
        .with_state(state)
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}
