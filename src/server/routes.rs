use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reelforge_common::EntryRef;
use serde_json::json;

use super::error::AppError;
use super::AppContext;
use crate::cache::PrepareRequest;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/prepare", post(prepare))
        .route("/entries/:entry_ref", get(get_entry))
}

pub fn stream_routes() -> Router<AppContext> {
    Router::new().route("/:entry_ref", get(stream_entry))
}

fn parse_entry_ref(raw: &str) -> Result<EntryRef, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("Invalid entry reference: {raw}")))
}

async fn prepare(
    State(ctx): State<AppContext>,
    Json(request): Json<PrepareRequest>,
) -> Result<impl IntoResponse, AppError> {
    let entry = ctx.coordinator.prepare(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": StatusCode::ACCEPTED.as_u16(),
            "message": "Prepared for streaming.",
            "data": entry.view(),
        })),
    ))
}

async fn get_entry(
    State(ctx): State<AppContext>,
    Path(entry_ref): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let entry = ctx.coordinator.get(parse_entry_ref(&entry_ref)?)?;
    Ok(Json(entry.view()))
}

async fn stream_entry(
    State(ctx): State<AppContext>,
    Path(entry_ref): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let entry_ref = parse_entry_ref(&entry_ref)?;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    tracing::debug!(entry_ref = %entry_ref, range = ?range, "Stream request");
    let response = ctx
        .coordinator
        .stream(entry_ref, range, ctx.shutdown.child_token())
        .await?;
    Ok(response)
}
