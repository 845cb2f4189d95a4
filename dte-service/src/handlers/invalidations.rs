use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{CreateInvalidationRequest, InvalidationResponse};
use crate::models::InvalidationRequest;
use crate::startup::AppState;

/// File an invalidation and drive it to the authority's answer.
#[tracing::instrument(
    skip(state, body),
    fields(document_id = %body.target_document_id, reason_code = body.reason_code)
)]
pub async fn create_invalidation(
    State(state): State<AppState>,
    Json(body): Json<CreateInvalidationRequest>,
) -> Result<(StatusCode, Json<InvalidationResponse>), AppError> {
    body.validate()?;

    let request = InvalidationRequest::try_from(body)?;
    let event = state.invalidations.invalidate(request).await?;

    Ok((StatusCode::CREATED, Json(event.into())))
}

#[tracing::instrument(skip(state))]
pub async fn get_invalidation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvalidationResponse>, AppError> {
    let event = state.invalidations.get_invalidation(id).await?;
    Ok(Json(event.into()))
}

#[tracing::instrument(skip(state))]
pub async fn retry_invalidation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvalidationResponse>, AppError> {
    let event = state.invalidations.retry_transmission(id).await?;
    Ok(Json(event.into()))
}
