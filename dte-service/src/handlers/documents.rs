//! Document lifecycle endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{CreateDocumentRequest, DocumentResponse, InvalidationResponse, NoteRequestBody};
use crate::startup::AppState;

#[tracing::instrument(skip(state, body), fields(document_type = ?body.document_type))]
pub async fn create_document(
    State(state): State<AppState>,
    Json(body): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), AppError> {
    body.validate()?;

    let document = state.engine.create_draft(body.into()).await?;

    Ok((StatusCode::CREATED, Json(document.into())))
}

#[tracing::instrument(skip(state))]
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = state.engine.get(id).await?;
    Ok(Json(document.into()))
}

#[tracing::instrument(skip(state))]
pub async fn get_document_by_generation_code(
    State(state): State<AppState>,
    Path(code): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = state.engine.get_by_generation_code(code).await?;
    Ok(Json(document.into()))
}

#[tracing::instrument(skip(state))]
pub async fn sign_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = state.engine.sign(id).await?;
    Ok(Json(document.into()))
}

#[tracing::instrument(skip(state))]
pub async fn transmit_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = state.engine.transmit(id).await?;
    Ok(Json(document.into()))
}

#[tracing::instrument(skip(state))]
pub async fn submit_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = state.engine.submit(id).await?;
    Ok(Json(document.into()))
}

#[tracing::instrument(skip(state))]
pub async fn resubmit_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = state.engine.resubmit_contingency(id).await?;
    Ok(Json(document.into()))
}

#[tracing::instrument(skip(state, body), fields(kind = ?body.kind))]
pub async fn compose_note(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<NoteRequestBody>,
) -> Result<(StatusCode, Json<DocumentResponse>), AppError> {
    body.validate()?;

    let note = state.notes.compose_note(body.into_request(id)).await?;

    Ok((StatusCode::CREATED, Json(note.into())))
}

#[tracing::instrument(skip(state))]
pub async fn list_document_invalidations(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<InvalidationResponse>>, AppError> {
    let events = state.invalidations.list_invalidations(id).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}
