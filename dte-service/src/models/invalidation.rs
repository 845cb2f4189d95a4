//! Invalidation (anulación) event model for dte-service.

use crate::models::document::AuthorityReceipt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Legal reason for invalidating a processed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidationReason {
    /// Data error on the original; a replacement document must be referenced.
    DataError,
    /// The operation was rescinded.
    Rescind,
    /// Any other reason; a free-text motive is mandatory.
    Other,
}

impl InvalidationReason {
    pub fn code(&self) -> u8 {
        match self {
            InvalidationReason::DataError => 1,
            InvalidationReason::Rescind => 2,
            InvalidationReason::Other => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(InvalidationReason::DataError),
            2 => Some(InvalidationReason::Rescind),
            3 => Some(InvalidationReason::Other),
            _ => None,
        }
    }
}

/// Lifecycle state of an invalidation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidationStatus {
    Pending,
    Signed,
    Transmitted,
    Processed,
    Rejected,
}

impl InvalidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationStatus::Pending => "PENDING",
            InvalidationStatus::Signed => "SIGNED",
            InvalidationStatus::Transmitted => "TRANSMITTED",
            InvalidationStatus::Processed => "PROCESSED",
            InvalidationStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(InvalidationStatus::Pending),
            "SIGNED" => Some(InvalidationStatus::Signed),
            "TRANSMITTED" => Some(InvalidationStatus::Transmitted),
            "PROCESSED" => Some(InvalidationStatus::Processed),
            "REJECTED" => Some(InvalidationStatus::Rejected),
            _ => None,
        }
    }

    /// A non-rejected event occupies the target's single invalidation slot.
    pub fn is_active(&self) -> bool {
        !matches!(self, InvalidationStatus::Rejected)
    }

    pub fn can_transition_to(&self, next: InvalidationStatus) -> bool {
        use InvalidationStatus::*;
        matches!(
            (self, next),
            (Pending, Signed)
                | (Signed, Transmitted)
                | (Transmitted, Processed)
                | (Transmitted, Rejected)
        )
    }
}

impl std::fmt::Display for InvalidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person taking part in an invalidation (the one who authorizes or files it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub id_document_type: String,
    pub id_document_number: String,
}

/// Invalidation event against a processed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub id: Uuid,
    pub generation_code: Uuid,
    pub target_document_id: Uuid,
    pub reason: InvalidationReason,
    pub motive: Option<String>,
    pub replacement_document_id: Option<Uuid>,
    pub responsible: Party,
    pub requester: Party,
    pub status: InvalidationStatus,
    pub signed_payload: Option<String>,
    pub receipt: Option<AuthorityReceipt>,
    pub rejection_reasons: Vec<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Reference to a document either by internal id or by generation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentRef {
    Id(Uuid),
    GenerationCode(Uuid),
}

/// Input for filing an invalidation.
#[derive(Debug, Clone)]
pub struct InvalidationRequest {
    pub target_document_id: Uuid,
    pub reason: InvalidationReason,
    pub motive: Option<String>,
    pub replacement: Option<DocumentRef>,
    pub responsible: Party,
    pub requester: Party,
}
