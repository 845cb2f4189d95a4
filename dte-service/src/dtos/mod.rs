//! Request and response bodies for the HTTP API.

pub mod documents;
pub mod invalidations;
pub mod ledger;

pub use documents::{
    CounterpartyBody, CreateDocumentRequest, DocumentResponse, LineBody, NoteLineBody,
    NoteRequestBody, SummaryResponse,
};
pub use invalidations::{CreateInvalidationRequest, InvalidationResponse, PartyBody};
pub use ledger::LedgerParams;
