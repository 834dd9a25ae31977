use crate::api::AppState;
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::info;

/// POST /api/gateways/{name}/webhook
///
/// (Re)registers this service's callback URL with the gateway. Gateways that
/// are configured from their own dashboard accept this as a no-op.
pub async fn register_webhook(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (config, client) = state.registry.client_for(&name).await?;
    let url = state.registry.settings().webhook_url(client.name());

    client.register_webhook(&url).await?;
    info!(gateway = %config.name, url = %url, "gateway webhook registered");

    Ok((
        StatusCode::OK,
        Json(json!({ "gateway": config.name, "webhook_url": url })),
    ))
}
