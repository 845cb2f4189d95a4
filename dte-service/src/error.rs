//! Domain errors for dte-service.

use crate::services::metrics::record_error;
use axum::http::StatusCode;
use chrono::NaiveDate;
use service_core::error::{AppError, DomainRejection};
use thiserror::Error;

/// Why a request failed field-level validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    ReplacementRequired,
    MotiveRequired,
    QuantityExceedsAvailable,
    IncompatibleOriginal,
    NoLinesSelected,
    UnknownOriginalLine,
    InvalidQuantity,
    InvalidField,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::ReplacementRequired => "REPLACEMENT_REQUIRED",
            ValidationCode::MotiveRequired => "MOTIVE_REQUIRED",
            ValidationCode::QuantityExceedsAvailable => "QUANTITY_EXCEEDS_AVAILABLE",
            ValidationCode::IncompatibleOriginal => "INCOMPATIBLE_ORIGINAL",
            ValidationCode::NoLinesSelected => "NO_LINES_SELECTED",
            ValidationCode::UnknownOriginalLine => "UNKNOWN_ORIGINAL_LINE",
            ValidationCode::InvalidQuantity => "INVALID_QUANTITY",
            ValidationCode::InvalidField => "INVALID_FIELD",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage adapter failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Conditional write lost against a concurrent writer.
    #[error("stale write for {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                RepositoryError::Conflict {
                    entity: "record",
                    id: db_err.constraint().unwrap_or("unique").to_string(),
                }
            }
            other => RepositoryError::Storage(anyhow::Error::new(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum DteError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} is {current}; operation requires {expected}")]
    InvalidState {
        entity: &'static str,
        current: String,
        expected: String,
    },

    #[error("document {0} already has an active invalidation")]
    AlreadyInvalidated(uuid::Uuid),

    #[error("invalidation deadline {deadline} has passed")]
    DeadlineExceeded { deadline: NaiveDate },

    #[error("{code}: {message}")]
    Validation {
        code: ValidationCode,
        message: String,
    },

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("tax authority rejected the submission: {}", reasons.join("; "))]
    AuthorityRejected { reasons: Vec<String> },

    #[error("tax authority unreachable: {0}")]
    TransportFailure(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl DteError {
    pub fn validation(code: ValidationCode, message: impl Into<String>) -> Self {
        DteError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DteError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        current: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        DteError::InvalidState {
            entity,
            current: current.to_string(),
            expected: expected.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DteError::NotFound { .. } => "NOT_FOUND",
            DteError::InvalidState { .. } => "INVALID_STATE",
            DteError::AlreadyInvalidated(_) => "ALREADY_INVALIDATED",
            DteError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            DteError::Validation { code, .. } => code.as_str(),
            DteError::Conflict(_) => "CONFLICT",
            DteError::AuthorityRejected { .. } => "AUTHORITY_REJECTED",
            DteError::TransportFailure(_) => "TRANSPORT_FAILURE",
            DteError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Transport failures are the only outcome a client should retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DteError::TransportFailure(_) | DteError::Conflict(_))
    }
}

impl From<RepositoryError> for DteError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict { entity, id } => {
                DteError::Conflict(format!("{} {} was modified concurrently", entity, id))
            }
            RepositoryError::NotFound(what) => DteError::NotFound {
                entity: "record",
                id: what,
            },
            other => DteError::Storage(other.to_string()),
        }
    }
}

impl From<DteError> for AppError {
    fn from(err: DteError) -> Self {
        let code = err.code();
        let message = err.to_string();
        record_error(code);
        match err {
            DteError::Storage(msg) => AppError::DatabaseError(anyhow::anyhow!(msg)),
            DteError::NotFound { .. } => {
                DomainRejection::new(StatusCode::NOT_FOUND, code, message).into()
            }
            DteError::InvalidState {
                current, expected, ..
            } => DomainRejection::new(StatusCode::CONFLICT, code, message)
                .with_details(serde_json::json!({
                    "current": current,
                    "expected": expected,
                }))
                .into(),
            DteError::AlreadyInvalidated(document_id) => {
                DomainRejection::new(StatusCode::CONFLICT, code, message)
                    .with_details(serde_json::json!({ "document_id": document_id }))
                    .into()
            }
            DteError::Conflict(_) => {
                DomainRejection::new(StatusCode::CONFLICT, code, message).into()
            }
            DteError::DeadlineExceeded { deadline } => {
                DomainRejection::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
                    .with_details(serde_json::json!({
                        "deadline": deadline.format("%Y-%m-%d").to_string(),
                    }))
                    .into()
            }
            DteError::Validation { .. } => {
                DomainRejection::new(StatusCode::UNPROCESSABLE_ENTITY, code, message).into()
            }
            DteError::AuthorityRejected { reasons } => {
                DomainRejection::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
                    .with_details(serde_json::json!({ "reasons": reasons }))
                    .into()
            }
            DteError::TransportFailure(_) => {
                DomainRejection::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
                    .with_details(serde_json::json!({ "retryable": true }))
                    .into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_expose_their_specific_code() {
        let err = DteError::validation(ValidationCode::QuantityExceedsAvailable, "7 > 6");
        assert_eq!(err.code(), "QUANTITY_EXCEEDS_AVAILABLE");
        assert!(!err.is_retryable());
    }

    #[test]
    fn repository_conflict_maps_to_domain_conflict() {
        let err: DteError = RepositoryError::Conflict {
            entity: "document",
            id: "abc".to_string(),
        }
        .into();
        assert_eq!(err.code(), "CONFLICT");
        assert!(err.is_retryable());
    }

    #[test]
    fn authority_rejection_keeps_reasons_verbatim() {
        let err = DteError::AuthorityRejected {
            reasons: vec!["[identificacion.numeroControl] YA EXISTE".to_string()],
        };
        assert!(err.to_string().contains("[identificacion.numeroControl] YA EXISTE"));
    }
}
