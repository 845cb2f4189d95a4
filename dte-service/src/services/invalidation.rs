//! Invalidation (anulación) of processed documents.
//!
//! Filing runs fail-fast checks in a fixed order, persists a PENDING event
//! together with a version bump on the target, then signs and transmits the
//! event. Acceptance flips the event to PROCESSED and the target to
//! INVALIDATED in one write; rejection frees the slot; a transport failure
//! leaves the event TRANSMITTED for [`InvalidationEngine::retry_transmission`].

use crate::error::{DteError, ValidationCode};
use crate::models::{
    AuthorityReceipt, DocumentRef, DocumentStatus, FiscalDocument, InvalidationEvent,
    InvalidationReason, InvalidationRequest, InvalidationStatus, Party,
};
use crate::services::deadline::DeadlinePolicy;
use crate::services::gateway::{
    AuthorityOutcome, Submission, SubmissionKind, TaxAuthorityGateway,
};
use crate::services::lifecycle::{
    advance, record_transition, sign_with_timeout, transmit_with_timeout, DteEngine,
};
use crate::services::locks::DocumentGuard;
use crate::services::metrics::INVALIDATIONS_TOTAL;
use crate::services::payload::invalidation_payload;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct InvalidationEngine {
    engine: DteEngine,
    gateway: Arc<dyn TaxAuthorityGateway>,
    policy: DeadlinePolicy,
}

fn reason_label(reason: InvalidationReason) -> &'static str {
    match reason {
        InvalidationReason::DataError => "data_error",
        InvalidationReason::Rescind => "rescind",
        InvalidationReason::Other => "other",
    }
}

fn record_event(event: &InvalidationEvent) {
    INVALIDATIONS_TOTAL
        .with_label_values(&[reason_label(event.reason), event.status.as_str()])
        .inc();
}

fn validate_party(role: &str, party: &Party) -> Result<(), DteError> {
    if party.name.trim().is_empty() || party.id_document_number.trim().is_empty() {
        return Err(DteError::validation(
            ValidationCode::InvalidField,
            format!("{} name and document number are required", role),
        ));
    }
    Ok(())
}

fn advance_event(
    event: &mut InvalidationEvent,
    next: InvalidationStatus,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), DteError> {
    if !event.status.can_transition_to(next) {
        return Err(DteError::invalid_state(
            "invalidation",
            event.status,
            format!("a state that can move to {}", next),
        ));
    }
    event.status = next;
    event.updated_utc = now;
    Ok(())
}

impl InvalidationEngine {
    pub fn new(
        engine: DteEngine,
        gateway: Arc<dyn TaxAuthorityGateway>,
        policy: DeadlinePolicy,
    ) -> Self {
        Self {
            engine,
            gateway,
            policy,
        }
    }

    pub fn policy(&self) -> &DeadlinePolicy {
        &self.policy
    }

    /// File an invalidation against a processed document.
    #[instrument(
        skip(self, request),
        fields(document_id = %request.target_document_id, reason = ?request.reason)
    )]
    pub async fn invalidate(
        &self,
        request: InvalidationRequest,
    ) -> Result<InvalidationEvent, DteError> {
        let repo = self.engine.repository().clone();
        let guard = self
            .engine
            .locks()
            .acquire(request.target_document_id)
            .await;

        let target = repo
            .get(request.target_document_id)
            .await?
            .ok_or_else(|| DteError::not_found("document", request.target_document_id))?;

        match target.status {
            DocumentStatus::Processed => {}
            DocumentStatus::Invalidated => return Err(DteError::AlreadyInvalidated(target.id)),
            current => return Err(DteError::invalid_state("document", current, "PROCESSED")),
        }

        if repo.active_invalidation(target.id).await?.is_some() {
            return Err(DteError::AlreadyInvalidated(target.id));
        }

        if request.reason == InvalidationReason::DataError && request.replacement.is_none() {
            return Err(DteError::validation(
                ValidationCode::ReplacementRequired,
                "a data-error invalidation must reference its replacement document",
            ));
        }

        let now = self.engine.now();
        let window = self
            .policy
            .can_invalidate(target.document_type, target.issued_at, now);
        if !window.allowed {
            return Err(DteError::DeadlineExceeded {
                deadline: window.deadline,
            });
        }

        let replacement = match (request.reason, request.replacement) {
            (InvalidationReason::DataError, Some(reference)) => {
                Some(self.resolve_replacement(&target, reference).await?)
            }
            _ => None,
        };

        let motive = request
            .motive
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        if request.reason == InvalidationReason::Other && motive.is_none() {
            return Err(DteError::validation(
                ValidationCode::MotiveRequired,
                "a motive is required when the reason is OTHER",
            ));
        }

        validate_party("responsible", &request.responsible)?;
        validate_party("requester", &request.requester)?;

        let event = InvalidationEvent {
            id: Uuid::new_v4(),
            generation_code: Uuid::new_v4(),
            target_document_id: target.id,
            reason: request.reason,
            motive,
            replacement_document_id: replacement.as_ref().map(|r| r.id),
            responsible: request.responsible,
            requester: request.requester,
            status: InvalidationStatus::Pending,
            signed_payload: None,
            receipt: None,
            rejection_reasons: Vec::new(),
            created_utc: now,
            updated_utc: now,
        };

        let target = repo.save(&target, Some(&event)).await?;
        record_event(&event);
        info!(
            invalidation_id = %event.id,
            deadline = %window.deadline,
            "Invalidation filed"
        );

        self.spawn_drive(guard, target, event, replacement).await
    }

    /// Re-drive an event left PENDING, SIGNED or TRANSMITTED by a signing or
    /// transport failure. The deadline was checked when the event was filed.
    #[instrument(skip(self), fields(invalidation_id = %event_id))]
    pub async fn retry_transmission(&self, event_id: Uuid) -> Result<InvalidationEvent, DteError> {
        let repo = self.engine.repository().clone();
        let event = self.get_invalidation(event_id).await?;
        let guard = self.engine.locks().acquire(event.target_document_id).await;

        // Re-read under the lock.
        let event = self.get_invalidation(event_id).await?;
        match event.status {
            InvalidationStatus::Processed => return Ok(event),
            InvalidationStatus::Rejected => {
                return Err(DteError::AuthorityRejected {
                    reasons: event.rejection_reasons,
                });
            }
            InvalidationStatus::Pending
            | InvalidationStatus::Signed
            | InvalidationStatus::Transmitted => {}
        }

        let target = repo
            .get(event.target_document_id)
            .await?
            .ok_or_else(|| DteError::not_found("document", event.target_document_id))?;
        let replacement = match event.replacement_document_id {
            Some(id) => repo.get(id).await?,
            None => None,
        };

        self.spawn_drive(guard, target, event, replacement).await
    }

    #[instrument(skip(self))]
    pub async fn get_invalidation(&self, id: Uuid) -> Result<InvalidationEvent, DteError> {
        self.engine
            .repository()
            .get_invalidation(id)
            .await?
            .ok_or_else(|| DteError::not_found("invalidation", id))
    }

    #[instrument(skip(self))]
    pub async fn list_invalidations(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<InvalidationEvent>, DteError> {
        let repo = self.engine.repository();
        if repo.get(document_id).await?.is_none() {
            return Err(DteError::not_found("document", document_id));
        }
        Ok(repo.list_invalidations(document_id).await?)
    }

    async fn resolve_replacement(
        &self,
        target: &FiscalDocument,
        reference: DocumentRef,
    ) -> Result<FiscalDocument, DteError> {
        let repo = self.engine.repository();
        let found = match reference {
            DocumentRef::Id(id) => repo.get(id).await?,
            DocumentRef::GenerationCode(code) => repo.get_by_generation_code(code).await?,
        };

        match found {
            None => Err(DteError::validation(
                ValidationCode::ReplacementRequired,
                "replacement document not found",
            )),
            Some(replacement) if replacement.id == target.id => Err(DteError::validation(
                ValidationCode::ReplacementRequired,
                "a document cannot replace itself",
            )),
            Some(replacement) if replacement.status != DocumentStatus::Processed => {
                Err(DteError::validation(
                    ValidationCode::ReplacementRequired,
                    format!(
                        "replacement document is {}; it must be PROCESSED",
                        replacement.status
                    ),
                ))
            }
            Some(replacement) => Ok(replacement),
        }
    }

    async fn spawn_drive(
        &self,
        guard: DocumentGuard,
        target: FiscalDocument,
        event: InvalidationEvent,
        replacement: Option<FiscalDocument>,
    ) -> Result<InvalidationEvent, DteError> {
        // The lock travels with the task so resolution completes under it even
        // if the caller is cancelled.
        let engine = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            engine.drive(target, event, replacement).await
        })
        .await
        .map_err(|e| DteError::TransportFailure(format!("invalidation task failed: {}", e)))?
    }

    async fn drive(
        &self,
        mut target: FiscalDocument,
        mut event: InvalidationEvent,
        replacement: Option<FiscalDocument>,
    ) -> Result<InvalidationEvent, DteError> {
        let repo = self.engine.repository().clone();
        let settings = self.engine.settings().clone();

        if event.status == InvalidationStatus::Pending {
            let payload = invalidation_payload(
                &event,
                &target,
                replacement.as_ref(),
                &settings.environment,
                settings.fiscal_offset,
            );
            let signed =
                sign_with_timeout(self.gateway.as_ref(), &payload, settings.authority_timeout)
                    .await
                    .inspect_err(|e| {
                        warn!(
                            invalidation_id = %event.id,
                            error = %e,
                            "Invalidation signing failed"
                        );
                    })?;
            advance_event(&mut event, InvalidationStatus::Signed, self.engine.now())?;
            event.signed_payload = Some(signed.into_inner());
            target = repo.save(&target, Some(&event)).await?;
            record_event(&event);
        }

        if event.status == InvalidationStatus::Signed {
            advance_event(&mut event, InvalidationStatus::Transmitted, self.engine.now())?;
            target = repo.save(&target, Some(&event)).await?;
            record_event(&event);
        }

        let signed_payload = event.signed_payload.clone().ok_or_else(|| {
            DteError::invalid_state("invalidation", event.status, "a signed payload")
        })?;
        let submission = Submission {
            kind: SubmissionKind::Invalidation,
            generation_code: event.generation_code,
            document_type: target.document_type,
            signed_payload,
        };
        let outcome =
            transmit_with_timeout(self.gateway.as_ref(), &submission, settings.authority_timeout)
                .await;

        let now = self.engine.now();
        match outcome {
            AuthorityOutcome::Accepted {
                reception_stamp,
                processed_at,
                observations,
            } => {
                advance_event(&mut event, InvalidationStatus::Processed, now)?;
                event.receipt = Some(AuthorityReceipt {
                    reception_stamp,
                    processed_at,
                    observations,
                });
                advance(&mut target, DocumentStatus::Invalidated, now)?;
                target.replacement_document_id = event.replacement_document_id;

                let stored = repo.save(&target, Some(&event)).await?;
                record_event(&event);
                record_transition(stored.document_type, stored.status);
                info!(
                    invalidation_id = %event.id,
                    generation_code = %stored.generation_code,
                    "Document invalidated"
                );
                Ok(event)
            }
            AuthorityOutcome::Rejected { reasons } => {
                advance_event(&mut event, InvalidationStatus::Rejected, now)?;
                event.rejection_reasons = reasons.clone();
                repo.save(&target, Some(&event)).await?;
                record_event(&event);
                warn!(invalidation_id = %event.id, reasons = ?reasons, "Invalidation rejected");
                Err(DteError::AuthorityRejected { reasons })
            }
            AuthorityOutcome::TransportError(message) => {
                warn!(
                    invalidation_id = %event.id,
                    error = %message,
                    "Invalidation left TRANSMITTED after transport failure"
                );
                Err(DteError::TransportFailure(format!(
                    "invalidation {} awaits retry: {}",
                    event.id, message
                )))
            }
        }
    }
}
