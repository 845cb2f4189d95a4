//! Credit/debit note composition inputs.

use crate::models::document::DocumentType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Credit,
    Debit,
}

impl NoteKind {
    pub fn document_type(&self) -> DocumentType {
        match self {
            NoteKind::Credit => DocumentType::CreditNote,
            NoteKind::Debit => DocumentType::DebitNote,
        }
    }
}

/// One original line picked for the note.
#[derive(Debug, Clone)]
pub struct NoteLineSelection {
    pub original_line_id: Uuid,
    pub quantity: Decimal,
    pub motive: Option<String>,
}

/// Input for composing a note against a processed original.
#[derive(Debug, Clone)]
pub struct NoteRequest {
    pub kind: NoteKind,
    pub original_document_id: Uuid,
    pub lines: Vec<NoteLineSelection>,
    pub observations: Option<String>,
}
