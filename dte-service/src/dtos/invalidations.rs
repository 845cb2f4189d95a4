use crate::models::{
    DocumentRef, InvalidationEvent, InvalidationReason, InvalidationRequest, InvalidationStatus,
    Party,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PartyBody {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 2))]
    pub doc_type: String,
    #[validate(length(min = 1, max = 20, message = "Document number must be 1-20 characters"))]
    pub doc_number: String,
}

impl From<PartyBody> for Party {
    fn from(body: PartyBody) -> Self {
        Party {
            name: body.name,
            id_document_type: body.doc_type,
            id_document_number: body.doc_number,
        }
    }
}

impl From<Party> for PartyBody {
    fn from(party: Party) -> Self {
        PartyBody {
            name: party.name,
            doc_type: party.id_document_type,
            doc_number: party.id_document_number,
        }
    }
}

/// Body of `POST /invalidations`.
///
/// `reason_code` is the authority's numeric code: 1 data error (needs
/// `replacement_generation_code`), 2 rescinded operation, 3 other (needs
/// `motive`).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateInvalidationRequest {
    pub target_document_id: Uuid,
    #[validate(range(min = 1, max = 3, message = "Reason code must be 1, 2 or 3"))]
    pub reason_code: u8,
    #[validate(length(max = 250))]
    pub motive: Option<String>,
    pub replacement_generation_code: Option<Uuid>,
    #[validate(nested)]
    pub responsible: PartyBody,
    #[validate(nested)]
    pub requester: PartyBody,
}

impl TryFrom<CreateInvalidationRequest> for InvalidationRequest {
    type Error = AppError;

    fn try_from(body: CreateInvalidationRequest) -> Result<Self, Self::Error> {
        let reason = InvalidationReason::from_code(body.reason_code).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Unknown invalidation reason code {}",
                body.reason_code
            ))
        })?;

        Ok(InvalidationRequest {
            target_document_id: body.target_document_id,
            reason,
            motive: body.motive,
            replacement: body
                .replacement_generation_code
                .map(DocumentRef::GenerationCode),
            responsible: body.responsible.into(),
            requester: body.requester.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationResponse {
    pub id: Uuid,
    pub generation_code: String,
    pub target_document_id: Uuid,
    pub reason: InvalidationReason,
    pub reason_code: u8,
    pub motive: Option<String>,
    pub replacement_document_id: Option<Uuid>,
    pub responsible: PartyBody,
    pub requester: PartyBody,
    pub status: InvalidationStatus,
    pub reception_stamp: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub rejection_reasons: Vec<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<InvalidationEvent> for InvalidationResponse {
    fn from(event: InvalidationEvent) -> Self {
        let (reception_stamp, processed_at) = match event.receipt {
            Some(receipt) => (Some(receipt.reception_stamp), Some(receipt.processed_at)),
            None => (None, None),
        };

        Self {
            id: event.id,
            generation_code: event.generation_code.to_string().to_uppercase(),
            target_document_id: event.target_document_id,
            reason: event.reason,
            reason_code: event.reason.code(),
            motive: event.motive,
            replacement_document_id: event.replacement_document_id,
            responsible: event.responsible.into(),
            requester: event.requester.into(),
            status: event.status,
            reception_stamp,
            processed_at,
            rejection_reasons: event.rejection_reasons,
            created_utc: event.created_utc,
            updated_utc: event.updated_utc,
        }
    }
}
