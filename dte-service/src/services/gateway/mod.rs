//! Tax authority gateway: signing and transmission of documents and
//! invalidation events.

pub mod http;
pub mod mock;

use crate::models::DocumentType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::retry::Retryable;
use thiserror::Error;
use uuid::Uuid;

pub use http::HttpTaxAuthorityGateway;
pub use mock::MockTaxAuthorityGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Signing rejected: {0}")]
    Signing(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Request(err) => err.is_retryable(),
            GatewayError::Signing(_) | GatewayError::Configuration(_) => false,
        }
    }
}

/// Signed representation returned by the signer (compact JWS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload(pub String);

impl SignedPayload {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Document,
    Invalidation,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Document => "transmit",
            SubmissionKind::Invalidation => "invalidate",
        }
    }
}

/// A signed document or invalidation ready for the authority.
#[derive(Debug, Clone)]
pub struct Submission {
    pub kind: SubmissionKind,
    pub generation_code: Uuid,
    pub document_type: DocumentType,
    pub signed_payload: String,
}

/// Result of a transmission. Transport problems are an outcome, not an error:
/// the caller resolves them to CONTINGENCY or leaves the event for retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityOutcome {
    Accepted {
        reception_stamp: String,
        processed_at: DateTime<Utc>,
        observations: Vec<String>,
    },
    Rejected {
        reasons: Vec<String>,
    },
    TransportError(String),
}

impl AuthorityOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AuthorityOutcome::Accepted { .. } => "accepted",
            AuthorityOutcome::Rejected { .. } => "rejected",
            AuthorityOutcome::TransportError(_) => "transport_error",
        }
    }
}

#[async_trait]
pub trait TaxAuthorityGateway: Send + Sync {
    async fn sign(&self, payload: &serde_json::Value) -> Result<SignedPayload, GatewayError>;
    async fn transmit(&self, submission: &Submission) -> AuthorityOutcome;
    async fn health_check(&self) -> Result<(), GatewayError>;
}
