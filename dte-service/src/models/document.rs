//! Fiscal document model for dte-service.

use crate::models::line_item::{LineItem, TaxTreatment};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fiscal document type, identified on the wire by its two-digit authority code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    FiscalCreditVoucher,
    CreditNote,
    DebitNote,
    RetentionVoucher,
    ExportInvoice,
    ExcludedSubjectVoucher,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::Invoice,
        DocumentType::FiscalCreditVoucher,
        DocumentType::CreditNote,
        DocumentType::DebitNote,
        DocumentType::RetentionVoucher,
        DocumentType::ExportInvoice,
        DocumentType::ExcludedSubjectVoucher,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "01",
            DocumentType::FiscalCreditVoucher => "03",
            DocumentType::CreditNote => "05",
            DocumentType::DebitNote => "06",
            DocumentType::RetentionVoucher => "07",
            DocumentType::ExportInvoice => "11",
            DocumentType::ExcludedSubjectVoucher => "14",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Whether VAT is charged on taxed lines of this document type.
    pub fn applies_vat(&self) -> bool {
        !matches!(
            self,
            DocumentType::ExportInvoice | DocumentType::ExcludedSubjectVoucher
        )
    }

    /// Credit and debit notes only exist as derivatives of an original document.
    pub fn is_note(&self) -> bool {
        matches!(self, DocumentType::CreditNote | DocumentType::DebitNote)
    }

    /// Whether notes may be issued against a processed document of this type.
    pub fn accepts_notes(&self) -> bool {
        matches!(
            self,
            DocumentType::FiscalCreditVoucher | DocumentType::RetentionVoucher
        )
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Lifecycle state of a fiscal document.
///
/// ```text
/// DRAFT ─▶ SIGNED ─▶ TRANSMITTED ─▶ PROCESSED ─▶ INVALIDATED
///                      │    ▲   └──▶ REJECTED
///                      ▼    │
///                    CONTINGENCY
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Signed,
    Transmitted,
    Processed,
    Rejected,
    Contingency,
    Invalidated,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Signed => "SIGNED",
            DocumentStatus::Transmitted => "TRANSMITTED",
            DocumentStatus::Processed => "PROCESSED",
            DocumentStatus::Rejected => "REJECTED",
            DocumentStatus::Contingency => "CONTINGENCY",
            DocumentStatus::Invalidated => "INVALIDATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(DocumentStatus::Draft),
            "SIGNED" => Some(DocumentStatus::Signed),
            "TRANSMITTED" => Some(DocumentStatus::Transmitted),
            "PROCESSED" => Some(DocumentStatus::Processed),
            "REJECTED" => Some(DocumentStatus::Rejected),
            "CONTINGENCY" => Some(DocumentStatus::Contingency),
            "INVALIDATED" => Some(DocumentStatus::Invalidated),
            _ => None,
        }
    }

    /// Legal single-step transitions. Anything else skips or reverses a stage.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Draft, Signed)
                | (Signed, Transmitted)
                | (Transmitted, Processed)
                | (Transmitted, Rejected)
                | (Transmitted, Contingency)
                | (Contingency, Transmitted)
                | (Processed, Invalidated)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Rejected | DocumentStatus::Invalidated)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The other party of the document: receiver for sales, supplier for
/// excluded-subject purchases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub tax_id: String,
    pub name: String,
    /// Identity document type code (e.g. `36` NIT, `13` DUI).
    pub id_document_type: String,
    pub nrc: Option<String>,
}

/// Monetary totals of a document, derived from its lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetarySummary {
    pub taxed: Decimal,
    pub exempt: Decimal,
    pub not_subject: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl MonetarySummary {
    pub fn zero() -> Self {
        Self {
            taxed: Decimal::ZERO,
            exempt: Decimal::ZERO,
            not_subject: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    /// Compute the summary for `lines` under `document_type`'s VAT regime.
    pub fn from_lines(lines: &[LineItem], document_type: DocumentType, vat_rate: Decimal) -> Self {
        let mut summary = Self::zero();
        for line in lines {
            let amount = line.amount();
            match line.tax_treatment {
                TaxTreatment::Taxed => summary.taxed += amount,
                TaxTreatment::Exempt => summary.exempt += amount,
                TaxTreatment::NotSubject => summary.not_subject += amount,
            }
        }
        if document_type.applies_vat() {
            summary.tax = round_money(summary.taxed * vat_rate);
        }
        summary.total = summary.taxed + summary.exempt + summary.not_subject + summary.tax;
        summary
    }
}

/// Round to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Authority acknowledgement stored once a document (or invalidation) is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityReceipt {
    pub reception_stamp: String,
    pub processed_at: DateTime<Utc>,
    pub observations: Vec<String>,
}

/// Electronic tax document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub id: Uuid,
    pub generation_code: Uuid,
    pub document_type: DocumentType,
    pub control_number: String,
    pub status: DocumentStatus,
    pub branch_id: Option<Uuid>,
    pub establishment_code: String,
    pub issued_at: DateTime<Utc>,
    pub currency: String,
    pub counterparty: Counterparty,
    pub lines: Vec<LineItem>,
    pub summary: MonetarySummary,
    pub original_document_id: Option<Uuid>,
    pub replacement_document_id: Option<Uuid>,
    pub signed_payload: Option<String>,
    pub receipt: Option<AuthorityReceipt>,
    pub rejection_reasons: Vec<String>,
    pub observations: Option<String>,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl FiscalDocument {
    /// Once the authority has accepted a document its amounts are frozen.
    pub fn is_frozen(&self) -> bool {
        matches!(
            self.status,
            DocumentStatus::Processed | DocumentStatus::Invalidated
        )
    }

    pub fn line(&self, line_id: Uuid) -> Option<&LineItem> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }
}

/// Input for creating a draft document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub document_type: DocumentType,
    pub branch_id: Option<Uuid>,
    pub establishment_code: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub currency: Option<String>,
    pub counterparty: Counterparty,
    pub lines: Vec<NewLine>,
    pub observations: Option<String>,
}

/// Input line for a new draft document.
#[derive(Debug, Clone)]
pub struct NewLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_treatment: TaxTreatment,
}

/// Format a control number: `DTE-{type}-{establishment}-{15-digit sequence}`.
pub fn format_control_number(
    document_type: DocumentType,
    establishment_code: &str,
    sequence: i64,
) -> String {
    format!(
        "DTE-{}-{}-{:015}",
        document_type.code(),
        establishment_code,
        sequence
    )
}
