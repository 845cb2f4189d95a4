//! Credit and debit notes derived from a processed original.

use crate::error::{DteError, ValidationCode};
use crate::models::{
    DocumentStatus, DocumentType, FiscalDocument, LineItem, NoteKind, NoteRequest,
};
use crate::services::lifecycle::{Draft, DteEngine};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct NoteComposer {
    engine: DteEngine,
}

/// Quantity already credited per original line by live credit notes.
///
/// Rejected and invalidated notes no longer count against the original.
pub fn credited_quantities(notes: &[FiscalDocument]) -> HashMap<Uuid, Decimal> {
    let mut credited: HashMap<Uuid, Decimal> = HashMap::new();
    for note in notes.iter().filter(|n| {
        n.document_type == DocumentType::CreditNote
            && !matches!(
                n.status,
                DocumentStatus::Rejected | DocumentStatus::Invalidated
            )
    }) {
        for line in &note.lines {
            if let Some(original_line_id) = line.original_line_id {
                *credited.entry(original_line_id).or_default() += line.quantity;
            }
        }
    }
    credited
}

impl NoteComposer {
    pub fn new(engine: DteEngine) -> Self {
        Self { engine }
    }

    /// Compose a DRAFT note; it then follows the regular lifecycle.
    #[instrument(
        skip(self, request),
        fields(original_id = %request.original_document_id, kind = ?request.kind)
    )]
    pub async fn compose_note(&self, request: NoteRequest) -> Result<FiscalDocument, DteError> {
        let repo = self.engine.repository().clone();
        // Serialize compositions per original so remaining quantities hold.
        let _guard = self
            .engine
            .locks()
            .acquire(request.original_document_id)
            .await;

        let original = repo
            .get(request.original_document_id)
            .await?
            .ok_or_else(|| DteError::not_found("document", request.original_document_id))?;

        if original.status != DocumentStatus::Processed {
            return Err(DteError::invalid_state(
                "original document",
                original.status,
                "PROCESSED",
            ));
        }

        if !original.document_type.accepts_notes() {
            return Err(DteError::validation(
                ValidationCode::IncompatibleOriginal,
                format!(
                    "notes can only be issued against CCF or retention vouchers, not type {}",
                    original.document_type
                ),
            ));
        }

        if request.lines.is_empty() {
            return Err(DteError::validation(
                ValidationCode::NoLinesSelected,
                "select at least one original line",
            ));
        }

        let mut requested: Vec<(Uuid, Decimal)> = Vec::new();
        for selection in &request.lines {
            if original.line(selection.original_line_id).is_none() {
                return Err(DteError::validation(
                    ValidationCode::UnknownOriginalLine,
                    format!(
                        "line {} does not belong to document {}",
                        selection.original_line_id, original.id
                    ),
                ));
            }
            if selection.quantity <= Decimal::ZERO {
                return Err(DteError::validation(
                    ValidationCode::InvalidQuantity,
                    format!(
                        "quantity for line {} must be positive",
                        selection.original_line_id
                    ),
                ));
            }
            match requested
                .iter_mut()
                .find(|(id, _)| *id == selection.original_line_id)
            {
                Some((_, total)) => *total += selection.quantity,
                None => requested.push((selection.original_line_id, selection.quantity)),
            }
        }

        let credited = match request.kind {
            NoteKind::Credit => credited_quantities(&repo.list_notes_for(original.id).await?),
            NoteKind::Debit => HashMap::new(),
        };

        for (line_id, quantity) in &requested {
            let Some(line) = original.line(*line_id) else {
                continue;
            };
            let available = line.quantity - credited.get(line_id).copied().unwrap_or_default();
            if *quantity > available {
                return Err(DteError::validation(
                    ValidationCode::QuantityExceedsAvailable,
                    format!(
                        "line {} requests {} but only {} is available",
                        line.line_number, quantity, available
                    ),
                ));
            }
        }

        let lines: Vec<LineItem> = request
            .lines
            .iter()
            .enumerate()
            .filter_map(|(index, selection)| {
                original.line(selection.original_line_id).map(|source| LineItem {
                    line_id: Uuid::new_v4(),
                    line_number: index as i32 + 1,
                    description: source.description.clone(),
                    quantity: selection.quantity,
                    unit_price: source.unit_price,
                    tax_treatment: source.tax_treatment,
                    original_line_id: Some(source.line_id),
                    motive: selection.motive.clone(),
                })
            })
            .collect();

        let note = self
            .engine
            .insert_draft(Draft {
                document_type: request.kind.document_type(),
                branch_id: original.branch_id,
                establishment_code: original.establishment_code.clone(),
                issued_at: self.engine.now(),
                currency: original.currency.clone(),
                counterparty: original.counterparty.clone(),
                lines,
                original_document_id: Some(original.id),
                observations: request.observations,
            })
            .await?;

        info!(
            note_id = %note.id,
            original_generation_code = %original.generation_code,
            total = %note.summary.total,
            "Note composed"
        );
        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Counterparty, MonetarySummary, TaxTreatment};
    use chrono::Utc;

    fn note(status: DocumentStatus, original_line_id: Uuid, quantity: i64) -> FiscalDocument {
        let now = Utc::now();
        FiscalDocument {
            id: Uuid::new_v4(),
            generation_code: Uuid::new_v4(),
            document_type: DocumentType::CreditNote,
            control_number: String::new(),
            status,
            branch_id: None,
            establishment_code: "M001P001".to_string(),
            issued_at: now,
            currency: "USD".to_string(),
            counterparty: Counterparty {
                tax_id: "06142803901121".to_string(),
                name: "Empresa".to_string(),
                id_document_type: "36".to_string(),
                nrc: Some("1234-5".to_string()),
            },
            lines: vec![LineItem {
                line_id: Uuid::new_v4(),
                line_number: 1,
                description: "Router".to_string(),
                quantity: Decimal::from(quantity),
                unit_price: Decimal::from(10),
                tax_treatment: TaxTreatment::Taxed,
                original_line_id: Some(original_line_id),
                motive: None,
            }],
            summary: MonetarySummary::zero(),
            original_document_id: None,
            replacement_document_id: None,
            signed_payload: None,
            receipt: None,
            rejection_reasons: Vec::new(),
            observations: None,
            version: 0,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn rejected_and_invalidated_notes_do_not_consume_quantity() {
        let line = Uuid::new_v4();
        let notes = vec![
            note(DocumentStatus::Processed, line, 3),
            note(DocumentStatus::Draft, line, 1),
            note(DocumentStatus::Rejected, line, 5),
            note(DocumentStatus::Invalidated, line, 2),
        ];

        let credited = credited_quantities(&notes);
        assert_eq!(credited.get(&line), Some(&Decimal::from(4)));
    }
}
