//! DTE lifecycle: draft creation, signing and transmission.

use crate::error::{DteError, ValidationCode};
use crate::models::{
    format_control_number, AuthorityReceipt, Counterparty, DocumentStatus, DocumentType,
    FiscalDocument, LineItem, MonetarySummary, NewDocument,
};
use crate::services::clock::Clock;
use crate::services::gateway::{
    AuthorityOutcome, GatewayError, SignedPayload, Submission, SubmissionKind,
    TaxAuthorityGateway,
};
use crate::services::locks::DocumentLocks;
use crate::services::metrics::{
    AUTHORITY_CALL_DURATION, AUTHORITY_OUTCOMES_TOTAL, DOCUMENT_TRANSITIONS_TOTAL,
};
use crate::services::payload::document_payload;
use crate::services::repository::DocumentRepository;
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Settings shared by the engines.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub vat_rate: Decimal,
    pub authority_timeout: Duration,
    pub environment: String,
    pub default_establishment: String,
    pub fiscal_offset: FixedOffset,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vat_rate: Decimal::new(13, 2),
            authority_timeout: Duration::from_secs(8),
            environment: "00".to_string(),
            default_establishment: "M001P001".to_string(),
            fiscal_offset: crate::services::deadline::fiscal_offset(-360),
        }
    }
}

/// Fully-built draft ready to be numbered and stored.
#[derive(Debug, Clone)]
pub(crate) struct Draft {
    pub document_type: DocumentType,
    pub branch_id: Option<Uuid>,
    pub establishment_code: String,
    pub issued_at: DateTime<Utc>,
    pub currency: String,
    pub counterparty: Counterparty,
    pub lines: Vec<LineItem>,
    pub original_document_id: Option<Uuid>,
    pub observations: Option<String>,
}

/// Drives documents through `DRAFT → SIGNED → TRANSMITTED → PROCESSED | REJECTED`.
#[derive(Clone)]
pub struct DteEngine {
    repo: Arc<dyn DocumentRepository>,
    gateway: Arc<dyn TaxAuthorityGateway>,
    locks: Arc<DocumentLocks>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransmitMode {
    Transmit,
    Resubmit,
}

pub(crate) fn record_transition(document_type: DocumentType, status: DocumentStatus) {
    DOCUMENT_TRANSITIONS_TOTAL
        .with_label_values(&[document_type.code(), status.as_str()])
        .inc();
}

/// Move `document` to `next`, refusing anything that skips or reverses a stage.
pub(crate) fn advance(
    document: &mut FiscalDocument,
    next: DocumentStatus,
    now: DateTime<Utc>,
) -> Result<(), DteError> {
    if !document.status.can_transition_to(next) {
        return Err(DteError::invalid_state(
            "document",
            document.status,
            format!("a state that can move to {}", next),
        ));
    }
    document.status = next;
    document.updated_utc = now;
    Ok(())
}

pub(crate) fn signing_failure(err: GatewayError) -> DteError {
    DteError::TransportFailure(format!("signing failed: {}", err))
}

/// Sign under the configured timeout; an unanswered signer is a transport failure.
pub(crate) async fn sign_with_timeout(
    gateway: &dyn TaxAuthorityGateway,
    payload: &serde_json::Value,
    timeout: Duration,
) -> Result<SignedPayload, DteError> {
    let timer = AUTHORITY_CALL_DURATION
        .with_label_values(&["sign"])
        .start_timer();
    let result = tokio::time::timeout(timeout, gateway.sign(payload)).await;
    timer.observe_duration();

    match result {
        Ok(signed) => signed.map_err(signing_failure),
        Err(_) => Err(DteError::TransportFailure(format!(
            "signing failed: no response from signer within {}s",
            timeout.as_secs_f64()
        ))),
    }
}

/// Run a transmission under the configured timeout, recording metrics.
pub(crate) async fn transmit_with_timeout(
    gateway: &dyn TaxAuthorityGateway,
    submission: &Submission,
    timeout: Duration,
) -> AuthorityOutcome {
    let operation = submission.kind.as_str();
    let timer = AUTHORITY_CALL_DURATION
        .with_label_values(&[operation])
        .start_timer();

    let outcome = match tokio::time::timeout(timeout, gateway.transmit(submission)).await {
        Ok(outcome) => outcome,
        Err(_) => AuthorityOutcome::TransportError(format!(
            "no response from authority within {}s",
            timeout.as_secs_f64()
        )),
    };

    timer.observe_duration();
    AUTHORITY_OUTCOMES_TOTAL
        .with_label_values(&[operation, outcome.label()])
        .inc();
    outcome
}

/// Upper bounds that keep line and summary arithmetic inside `Decimal` range.
pub const MAX_LINE_QUANTITY: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
pub const MAX_LINES: usize = 2_000;

fn validation(code: ValidationCode, message: impl Into<String>) -> DteError {
    DteError::validation(code, message)
}

fn validate_new_document(input: &NewDocument) -> Result<(), DteError> {
    if input.document_type.is_note() {
        return Err(validation(
            ValidationCode::InvalidField,
            "credit and debit notes are composed from a processed original",
        ));
    }
    if input.counterparty.name.trim().is_empty() {
        return Err(validation(
            ValidationCode::InvalidField,
            "counterparty name is required",
        ));
    }
    if let Some(code) = &input.establishment_code {
        if code.len() != 8 {
            return Err(validation(
                ValidationCode::InvalidField,
                format!("establishment code '{}' must have 8 characters", code),
            ));
        }
    }
    if input.lines.is_empty() {
        return Err(validation(
            ValidationCode::NoLinesSelected,
            "a document needs at least one line",
        ));
    }
    if input.lines.len() > MAX_LINES {
        return Err(validation(
            ValidationCode::InvalidField,
            format!("a document holds at most {} lines", MAX_LINES),
        ));
    }
    for (index, line) in input.lines.iter().enumerate() {
        if line.quantity > MAX_LINE_QUANTITY {
            return Err(validation(
                ValidationCode::InvalidQuantity,
                format!("line {} quantity exceeds {}", index + 1, MAX_LINE_QUANTITY),
            ));
        }
        if line.unit_price > MAX_UNIT_PRICE {
            return Err(validation(
                ValidationCode::InvalidField,
                format!("line {} unit price exceeds {}", index + 1, MAX_UNIT_PRICE),
            ));
        }
        if line.quantity <= Decimal::ZERO {
            return Err(validation(
                ValidationCode::InvalidQuantity,
                format!("line {} quantity must be positive", index + 1),
            ));
        }
        if line.unit_price < Decimal::ZERO {
            return Err(validation(
                ValidationCode::InvalidField,
                format!("line {} unit price cannot be negative", index + 1),
            ));
        }
        if line.description.trim().is_empty() {
            return Err(validation(
                ValidationCode::InvalidField,
                format!("line {} description is required", index + 1),
            ));
        }
    }
    Ok(())
}

impl DteEngine {
    pub fn new(
        repo: Arc<dyn DocumentRepository>,
        gateway: Arc<dyn TaxAuthorityGateway>,
        locks: Arc<DocumentLocks>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            repo,
            gateway,
            locks,
            clock,
            settings,
        }
    }

    pub fn repository(&self) -> &Arc<dyn DocumentRepository> {
        &self.repo
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn locks(&self) -> &Arc<DocumentLocks> {
        &self.locks
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a DRAFT document with an allocated control number.
    #[instrument(skip(self, input), fields(document_type = %input.document_type))]
    pub async fn create_draft(&self, input: NewDocument) -> Result<FiscalDocument, DteError> {
        validate_new_document(&input)?;

        let lines = input
            .lines
            .into_iter()
            .enumerate()
            .map(|(index, line)| LineItem {
                line_id: Uuid::new_v4(),
                line_number: index as i32 + 1,
                description: line.description,
                quantity: line.quantity,
                unit_price: line.unit_price,
                tax_treatment: line.tax_treatment,
                original_line_id: None,
                motive: None,
            })
            .collect();

        self.insert_draft(Draft {
            document_type: input.document_type,
            branch_id: input.branch_id,
            establishment_code: input
                .establishment_code
                .unwrap_or_else(|| self.settings.default_establishment.clone()),
            issued_at: input.issued_at.unwrap_or_else(|| self.clock.now()),
            currency: input.currency.unwrap_or_else(|| "USD".to_string()),
            counterparty: input.counterparty,
            lines,
            original_document_id: None,
            observations: input.observations,
        })
        .await
    }

    pub(crate) async fn insert_draft(&self, draft: Draft) -> Result<FiscalDocument, DteError> {
        let sequence = self
            .repo
            .allocate_control_sequence(draft.document_type, &draft.establishment_code)
            .await?;
        let now = self.clock.now();
        let summary =
            MonetarySummary::from_lines(&draft.lines, draft.document_type, self.settings.vat_rate);

        let document = FiscalDocument {
            id: Uuid::new_v4(),
            generation_code: Uuid::new_v4(),
            document_type: draft.document_type,
            control_number: format_control_number(
                draft.document_type,
                &draft.establishment_code,
                sequence,
            ),
            status: DocumentStatus::Draft,
            branch_id: draft.branch_id,
            establishment_code: draft.establishment_code,
            issued_at: draft.issued_at,
            currency: draft.currency,
            counterparty: draft.counterparty,
            lines: draft.lines,
            summary,
            original_document_id: draft.original_document_id,
            replacement_document_id: None,
            signed_payload: None,
            receipt: None,
            rejection_reasons: Vec::new(),
            observations: draft.observations,
            version: 0,
            created_utc: now,
            updated_utc: now,
        };

        self.repo.insert(&document).await?;
        record_transition(document.document_type, DocumentStatus::Draft);

        info!(
            document_id = %document.id,
            generation_code = %document.generation_code,
            control_number = %document.control_number,
            total = %document.summary.total,
            "Draft created"
        );

        Ok(document)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<FiscalDocument, DteError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| DteError::not_found("document", id))
    }

    #[instrument(skip(self))]
    pub async fn get_by_generation_code(
        &self,
        generation_code: Uuid,
    ) -> Result<FiscalDocument, DteError> {
        self.repo
            .get_by_generation_code(generation_code)
            .await?
            .ok_or_else(|| DteError::not_found("document", generation_code))
    }

    /// `DRAFT → SIGNED`.
    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn sign(&self, id: Uuid) -> Result<FiscalDocument, DteError> {
        let _guard = self.locks.acquire(id).await;
        let mut document = self.get(id).await?;
        if document.status != DocumentStatus::Draft {
            return Err(DteError::invalid_state("document", document.status, "DRAFT"));
        }

        let related = match document.original_document_id {
            Some(original_id) => Some(self.get(original_id).await?),
            None => None,
        };
        let payload = document_payload(
            &document,
            related.as_ref(),
            &self.settings.environment,
            self.settings.fiscal_offset,
        );
        let signed = sign_with_timeout(
            self.gateway.as_ref(),
            &payload,
            self.settings.authority_timeout,
        )
        .await?;

        advance(&mut document, DocumentStatus::Signed, self.clock.now())?;
        document.signed_payload = Some(signed.into_inner());
        let stored = self.repo.save(&document, None).await?;
        record_transition(stored.document_type, stored.status);

        info!(generation_code = %stored.generation_code, "Document signed");
        Ok(stored)
    }

    /// `SIGNED | CONTINGENCY → TRANSMITTED → PROCESSED | REJECTED | CONTINGENCY`.
    ///
    /// Idempotent per generation code: a processed document is returned as-is
    /// and a rejected one reports its stored reasons, without calling the
    /// authority again.
    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn transmit(&self, id: Uuid) -> Result<FiscalDocument, DteError> {
        self.spawn_transmission(id, TransmitMode::Transmit).await
    }

    /// Re-send a document left in CONTINGENCY by a transport failure.
    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn resubmit_contingency(&self, id: Uuid) -> Result<FiscalDocument, DteError> {
        self.spawn_transmission(id, TransmitMode::Resubmit).await
    }

    /// Sign (when still a draft) and transmit.
    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn submit(&self, id: Uuid) -> Result<FiscalDocument, DteError> {
        let document = self.get(id).await?;
        if document.status == DocumentStatus::Draft {
            self.sign(id).await?;
        }
        self.transmit(id).await
    }

    async fn spawn_transmission(
        &self,
        id: Uuid,
        mode: TransmitMode,
    ) -> Result<FiscalDocument, DteError> {
        // Resolution must finish even if the caller goes away.
        let engine = self.clone();
        tokio::spawn(async move { engine.transmit_and_resolve(id, mode).await })
            .await
            .map_err(|e| DteError::TransportFailure(format!("transmission task failed: {}", e)))?
    }

    async fn transmit_and_resolve(
        &self,
        id: Uuid,
        mode: TransmitMode,
    ) -> Result<FiscalDocument, DteError> {
        let _guard = self.locks.acquire(id).await;
        let mut document = self.get(id).await?;

        match (mode, document.status) {
            (TransmitMode::Transmit, DocumentStatus::Processed) => return Ok(document),
            (TransmitMode::Transmit, DocumentStatus::Rejected) => {
                return Err(DteError::AuthorityRejected {
                    reasons: document.rejection_reasons,
                });
            }
            (TransmitMode::Transmit, DocumentStatus::Signed | DocumentStatus::Contingency)
            | (TransmitMode::Resubmit, DocumentStatus::Contingency) => {
                advance(&mut document, DocumentStatus::Transmitted, self.clock.now())?;
                document = self.repo.save(&document, None).await?;
                record_transition(document.document_type, document.status);
            }
            // A previous attempt stopped between persisting TRANSMITTED and
            // resolving; send again without another transition.
            (TransmitMode::Transmit, DocumentStatus::Transmitted) => {
                warn!(
                    generation_code = %document.generation_code,
                    "Re-driving transmitted document"
                );
            }
            (TransmitMode::Transmit, current) => {
                return Err(DteError::invalid_state(
                    "document",
                    current,
                    "SIGNED or CONTINGENCY",
                ));
            }
            (TransmitMode::Resubmit, current) => {
                return Err(DteError::invalid_state("document", current, "CONTINGENCY"));
            }
        }

        let signed_payload = document.signed_payload.clone().ok_or_else(|| {
            DteError::invalid_state("document", "unsigned", "a signed payload")
        })?;
        let submission = Submission {
            kind: SubmissionKind::Document,
            generation_code: document.generation_code,
            document_type: document.document_type,
            signed_payload,
        };

        let outcome = transmit_with_timeout(
            self.gateway.as_ref(),
            &submission,
            self.settings.authority_timeout,
        )
        .await;

        self.resolve(document, outcome).await
    }

    async fn resolve(
        &self,
        mut document: FiscalDocument,
        outcome: AuthorityOutcome,
    ) -> Result<FiscalDocument, DteError> {
        let now = self.clock.now();
        match outcome {
            AuthorityOutcome::Accepted {
                reception_stamp,
                processed_at,
                observations,
            } => {
                advance(&mut document, DocumentStatus::Processed, now)?;
                document.receipt = Some(AuthorityReceipt {
                    reception_stamp,
                    processed_at,
                    observations,
                });
                let stored = self.repo.save(&document, None).await?;
                record_transition(stored.document_type, stored.status);
                info!(generation_code = %stored.generation_code, "Document processed");
                Ok(stored)
            }
            AuthorityOutcome::Rejected { reasons } => {
                advance(&mut document, DocumentStatus::Rejected, now)?;
                document.rejection_reasons = reasons.clone();
                let stored = self.repo.save(&document, None).await?;
                record_transition(stored.document_type, stored.status);
                warn!(
                    generation_code = %stored.generation_code,
                    reasons = ?reasons,
                    "Document rejected"
                );
                Err(DteError::AuthorityRejected { reasons })
            }
            AuthorityOutcome::TransportError(message) => {
                advance(&mut document, DocumentStatus::Contingency, now)?;
                let stored = self.repo.save(&document, None).await?;
                record_transition(stored.document_type, stored.status);
                warn!(
                    generation_code = %stored.generation_code,
                    error = %message,
                    "Document moved to contingency"
                );
                Err(DteError::TransportFailure(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewLine, TaxTreatment};

    fn new_document(document_type: DocumentType) -> NewDocument {
        NewDocument {
            document_type,
            branch_id: None,
            establishment_code: None,
            issued_at: None,
            currency: None,
            counterparty: Counterparty {
                tax_id: "06142803901121".to_string(),
                name: "Cliente".to_string(),
                id_document_type: "36".to_string(),
                nrc: None,
            },
            lines: vec![NewLine {
                description: "Plan 20 Mbps".to_string(),
                quantity: Decimal::ONE,
                unit_price: Decimal::new(2000, 2),
                tax_treatment: TaxTreatment::Taxed,
            }],
            observations: None,
        }
    }

    #[test]
    fn notes_cannot_be_created_directly() {
        let err = validate_new_document(&new_document(DocumentType::CreditNote)).unwrap_err();
        assert_eq!(err.code(), "INVALID_FIELD");
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut input = new_document(DocumentType::Invoice);
        input.lines[0].quantity = Decimal::ZERO;
        assert_eq!(validate_new_document(&input).unwrap_err().code(), "INVALID_QUANTITY");
    }

    #[test]
    fn amounts_outside_decimal_range_are_rejected() {
        let mut input = new_document(DocumentType::Invoice);
        input.lines[0].quantity = Decimal::MAX;
        input.lines[0].unit_price = Decimal::TWO;
        assert_eq!(validate_new_document(&input).unwrap_err().code(), "INVALID_QUANTITY");

        let mut input = new_document(DocumentType::Invoice);
        input.lines[0].unit_price = Decimal::MAX;
        assert_eq!(validate_new_document(&input).unwrap_err().code(), "INVALID_FIELD");

        let mut input = new_document(DocumentType::Invoice);
        input.lines[0].quantity = MAX_LINE_QUANTITY;
        input.lines[0].unit_price = MAX_UNIT_PRICE;
        assert!(validate_new_document(&input).is_ok());
    }

    #[test]
    fn short_establishment_code_is_rejected() {
        let mut input = new_document(DocumentType::Invoice);
        input.establishment_code = Some("M001".to_string());
        assert_eq!(validate_new_document(&input).unwrap_err().code(), "INVALID_FIELD");
    }
}
