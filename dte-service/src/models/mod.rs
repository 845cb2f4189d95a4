//! Domain models for dte-service.

mod document;
mod invalidation;
mod ledger;
mod line_item;
mod note;

pub use document::{
    format_control_number, round_money, AuthorityReceipt, Counterparty, DocumentStatus,
    DocumentType, FiscalDocument, MonetarySummary, NewDocument, NewLine,
};
pub use invalidation::{
    DocumentRef, InvalidationEvent, InvalidationReason, InvalidationRequest, InvalidationStatus,
    Party,
};
pub use ledger::{
    LedgerKind, LedgerQuery, LedgerReport, LedgerRow, LedgerTotals, DOCUMENT_CLASS_ELECTRONIC,
    INCOME_TYPE_COMMERCIAL, OPERATION_TYPE_TAXED,
};
pub use line_item::{LineItem, TaxTreatment};
pub use note::{NoteKind, NoteLineSelection, NoteRequest};
