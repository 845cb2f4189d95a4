use crate::models::{
    Counterparty, DocumentStatus, DocumentType, FiscalDocument, LineItem, NewDocument, NewLine,
    NoteKind, NoteLineSelection, NoteRequest, TaxTreatment,
};
use crate::services::ledger::format_money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

fn default_tax_treatment() -> TaxTreatment {
    TaxTreatment::Taxed
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CounterpartyBody {
    #[validate(length(min = 1, max = 20, message = "Tax id must be 1-20 characters"))]
    pub tax_id: String,
    #[validate(length(min = 1, max = 250, message = "Name must be 1-250 characters"))]
    pub name: String,
    #[validate(length(equal = 2, message = "Identification type is a two-digit code"))]
    pub id_document_type: String,
    #[validate(length(max = 10))]
    pub nrc: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LineBody {
    #[validate(length(min = 1, max = 1000, message = "Description must be 1-1000 characters"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default = "default_tax_treatment")]
    pub tax_treatment: TaxTreatment,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDocumentRequest {
    pub document_type: DocumentType,
    pub branch_id: Option<Uuid>,
    #[validate(length(equal = 8, message = "Establishment code must have 8 characters"))]
    pub establishment_code: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    #[validate(nested)]
    pub counterparty: CounterpartyBody,
    #[validate(nested)]
    pub lines: Vec<LineBody>,
    pub observations: Option<String>,
}

impl From<CreateDocumentRequest> for NewDocument {
    fn from(body: CreateDocumentRequest) -> Self {
        NewDocument {
            document_type: body.document_type,
            branch_id: body.branch_id,
            establishment_code: body.establishment_code,
            issued_at: body.issued_at,
            currency: body.currency,
            counterparty: Counterparty {
                tax_id: body.counterparty.tax_id,
                name: body.counterparty.name,
                id_document_type: body.counterparty.id_document_type,
                nrc: body.counterparty.nrc,
            },
            lines: body
                .lines
                .into_iter()
                .map(|line| NewLine {
                    description: line.description,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    tax_treatment: line.tax_treatment,
                })
                .collect(),
            observations: body.observations,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NoteLineBody {
    pub original_line_id: Uuid,
    pub quantity: Decimal,
    #[validate(length(max = 1000))]
    pub motive: Option<String>,
}

/// Body of `POST /documents/:id/notes`. An empty `lines` list is reported by
/// the composer as `NO_LINES_SELECTED`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NoteRequestBody {
    pub kind: NoteKind,
    #[serde(default)]
    #[validate(nested)]
    pub lines: Vec<NoteLineBody>,
    pub observations: Option<String>,
}

impl NoteRequestBody {
    pub fn into_request(self, original_document_id: Uuid) -> NoteRequest {
        NoteRequest {
            kind: self.kind,
            original_document_id,
            lines: self
                .lines
                .into_iter()
                .map(|line| NoteLineSelection {
                    original_line_id: line.original_line_id,
                    quantity: line.quantity,
                    motive: line.motive,
                })
                .collect(),
            observations: self.observations,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub taxed: String,
    pub exempt: String,
    pub not_subject: String,
    pub tax: String,
    pub total: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub generation_code: String,
    pub document_type: DocumentType,
    pub document_type_code: String,
    pub control_number: String,
    pub status: DocumentStatus,
    pub branch_id: Option<Uuid>,
    pub establishment_code: String,
    pub issued_at: DateTime<Utc>,
    pub currency: String,
    pub counterparty: Counterparty,
    pub lines: Vec<LineItem>,
    pub summary: SummaryResponse,
    pub original_document_id: Option<Uuid>,
    pub replacement_document_id: Option<Uuid>,
    pub reception_stamp: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub authority_observations: Vec<String>,
    pub rejection_reasons: Vec<String>,
    pub observations: Option<String>,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<FiscalDocument> for DocumentResponse {
    fn from(document: FiscalDocument) -> Self {
        let (reception_stamp, processed_at, authority_observations) = match document.receipt {
            Some(receipt) => (
                Some(receipt.reception_stamp),
                Some(receipt.processed_at),
                receipt.observations,
            ),
            None => (None, None, Vec::new()),
        };

        Self {
            id: document.id,
            generation_code: document.generation_code.to_string().to_uppercase(),
            document_type: document.document_type,
            document_type_code: document.document_type.code().to_string(),
            control_number: document.control_number,
            status: document.status,
            branch_id: document.branch_id,
            establishment_code: document.establishment_code,
            issued_at: document.issued_at,
            currency: document.currency,
            counterparty: document.counterparty,
            lines: document.lines,
            summary: SummaryResponse {
                taxed: format_money(document.summary.taxed),
                exempt: format_money(document.summary.exempt),
                not_subject: format_money(document.summary.not_subject),
                tax: format_money(document.summary.tax),
                total: format_money(document.summary.total),
            },
            original_document_id: document.original_document_id,
            replacement_document_id: document.replacement_document_id,
            reception_stamp,
            processed_at,
            authority_observations,
            rejection_reasons: document.rejection_reasons,
            observations: document.observations,
            version: document.version,
            created_utc: document.created_utc,
            updated_utc: document.updated_utc,
        }
    }
}
