use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::dtos::LedgerParams;
use crate::models::{LedgerKind, LedgerReport};
use crate::services::to_csv;
use crate::startup::AppState;

fn parse_kind(kind: &str) -> Result<LedgerKind, AppError> {
    LedgerKind::parse(kind)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Unknown ledger '{}'", kind)))
}

#[tracing::instrument(skip(state, params))]
pub async fn get_ledger(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<LedgerParams>,
) -> Result<Json<LedgerReport>, AppError> {
    let kind = parse_kind(&kind)?;
    let report = state.ledger.build_ledger(params.into_query(kind)).await?;
    Ok(Json(report))
}

/// Semicolon-separated export for the authority's annex upload.
#[tracing::instrument(skip(state, params))]
pub async fn export_ledger(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<LedgerParams>,
) -> Result<impl IntoResponse, AppError> {
    let kind = parse_kind(&kind)?;
    let report = state.ledger.build_ledger(params.into_query(kind)).await?;
    let body = to_csv(&report)?;

    let filename = format!(
        "attachment; filename=\"{}_{}_{}.csv\"",
        kind.as_str(),
        report.period_start.format("%Y%m%d"),
        report.period_end.format("%Y%m%d")
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        body,
    ))
}
