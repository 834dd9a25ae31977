//! Flow editor endpoints: raw documents and their computed layout.

use crate::api::AppState;
use crate::error::AppError;
use crate::flow::document::FlowDocument;
use crate::flow::layout::FlowLayoutEngine;
use crate::flow::store::FlowDocumentKind;
use crate::middleware::error::{get_request_id_from_headers, ErrorResponse};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct LayoutQuery {
    #[serde(default)]
    pub document: FlowDocumentKind,
}

fn unknown_document(headers: &HeaderMap, document: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::validation_error(
            get_request_id_from_headers(headers),
            "document",
            &format!("unknown flow document '{}', expected primary, campaign or merged", document),
        )),
    )
        .into_response()
}

fn parse_kind(document: &str) -> Option<FlowDocumentKind> {
    match document {
        "primary" => Some(FlowDocumentKind::Primary),
        "campaign" => Some(FlowDocumentKind::Campaign),
        "merged" => Some(FlowDocumentKind::Merged),
        _ => None,
    }
}

/// GET /api/flows/layout?document=primary|campaign|merged
pub async fn layout(
    State(state): State<AppState>,
    Query(query): Query<LayoutQuery>,
) -> Result<Response, AppError> {
    let document = state.flows.load(query.document).await?;
    let layout = FlowLayoutEngine::layout(&document);
    Ok((StatusCode::OK, Json(layout)).into_response())
}

/// GET /api/flows/{document}
pub async fn get_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(document): Path<String>,
) -> Result<Response, AppError> {
    let Some(kind) = parse_kind(&document) else {
        return Ok(unknown_document(&headers, &document));
    };
    let document = state.flows.load(kind).await?;
    Ok((StatusCode::OK, Json(document)).into_response())
}

/// PUT /api/flows/{document}
pub async fn put_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(document): Path<String>,
    body: Result<Json<FlowDocument>, JsonRejection>,
) -> Result<Response, AppError> {
    let Some(kind) = parse_kind(&document) else {
        return Ok(unknown_document(&headers, &document));
    };
    let Json(flow) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::validation_error(
                    get_request_id_from_headers(&headers),
                    "body",
                    &rejection.body_text(),
                )),
            )
                .into_response())
        }
    };

    state.flows.save(kind, &flow).await?;
    info!(document = %document, screens = flow.screens.len(), "flow document updated");

    // The editor redraws from the layout of what was just saved
    Ok((StatusCode::OK, Json(FlowLayoutEngine::layout(&flow))).into_response())
}
