use crate::api::AppState;
use crate::error::AppError;
use crate::middleware::error::{get_request_id_from_headers, ErrorResponse};
use crate::services::payment_service::{CreatePaymentRequest, RegisterUserRequest};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

fn rejected_body(headers: &HeaderMap, rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::validation_error(
            get_request_id_from_headers(headers),
            "body",
            &rejection.body_text(),
        )),
    )
        .into_response()
}

fn with_request_id(headers: &HeaderMap, err: impl Into<AppError>) -> Response {
    let err: AppError = err.into();
    match get_request_id_from_headers(headers) {
        Some(request_id) => err.with_request_id(request_id).into_response(),
        None => err.into_response(),
    }
}

/// POST /api/users
pub async fn register_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RegisterUserRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(&headers, rejection),
    };

    match state.payments.register_user(request).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => with_request_id(&headers, e),
    }
}

/// POST /api/payments
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreatePaymentRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(&headers, rejection),
    };

    info!(
        telegram_id = request.telegram_id,
        amount = %request.amount,
        gateway = request.gateway.as_deref().unwrap_or("auto"),
        "payment requested"
    );

    match state.payments.create_payment(request).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => with_request_id(&headers, e),
    }
}

/// GET /api/payments/{correlation_id}
pub async fn payment_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(correlation_id): Path<String>,
) -> Response {
    match state.payments.payment_status(&correlation_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => with_request_id(&headers, e),
    }
}
