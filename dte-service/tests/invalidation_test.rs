//! Invalidation engine integration tests.

mod common;

use chrono::NaiveDate;
use common::{dec, invalidation_request, line, local, new_document, TestHarness};
use dte_service::models::{
    DocumentRef, DocumentStatus, DocumentType, FiscalDocument, InvalidationReason,
    InvalidationStatus,
};
use dte_service::DteError;

async fn processed_invoice(harness: &TestHarness) -> FiscalDocument {
    harness
        .processed(
            DocumentType::Invoice,
            local(2024, 1, 1, 9),
            vec![line("Plan 100 Mbps", "1", "100.00")],
        )
        .await
}

#[tokio::test]
async fn rescind_within_three_months_invalidates_the_invoice() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    assert_eq!(invoice.summary.total, dec("113.00"));

    harness.set_now(local(2024, 3, 31, 10));
    let event = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap();

    assert_eq!(event.status, InvalidationStatus::Processed);
    assert!(event.receipt.is_some());
    let stored = harness.engine.get(invoice.id).await.unwrap();
    assert_eq!(stored.status, DocumentStatus::Invalidated);
    assert_eq!(stored.summary, invoice.summary);
}

#[tokio::test]
async fn rescind_after_deadline_reports_the_deadline() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;

    harness.set_now(local(2024, 4, 2, 10));
    let err = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap_err();

    match err {
        DteError::DeadlineExceeded { deadline } => {
            assert_eq!(deadline, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        }
        other => panic!("expected DeadlineExceeded, got {:?}", other),
    }
    assert_eq!(
        harness.engine.get(invoice.id).await.unwrap().status,
        DocumentStatus::Processed
    );
}

#[tokio::test]
async fn deadline_day_is_inclusive_in_local_time() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;

    // 23:00 local on the deadline is already 2024-04-02 in UTC.
    harness.set_now(local(2024, 4, 1, 23));
    let event = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap();

    assert_eq!(event.status, InvalidationStatus::Processed);
}

#[tokio::test]
async fn data_error_without_replacement_is_rejected_even_past_deadline() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    let signs_before = harness.gateway.sign_count();

    harness.set_now(local(2024, 6, 1, 10));
    let err = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::DataError))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "REPLACEMENT_REQUIRED");
    assert_eq!(harness.gateway.sign_count(), signs_before);
}

#[tokio::test]
async fn data_error_links_the_replacement() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    let replacement = processed_invoice(&harness).await;

    let mut request = invalidation_request(invoice.id, InvalidationReason::DataError);
    request.replacement = Some(DocumentRef::GenerationCode(replacement.generation_code));
    let event = harness.invalidations.invalidate(request).await.unwrap();

    assert_eq!(event.replacement_document_id, Some(replacement.id));
    let stored = harness.engine.get(invoice.id).await.unwrap();
    assert_eq!(stored.status, DocumentStatus::Invalidated);
    assert_eq!(stored.replacement_document_id, Some(replacement.id));
}

#[tokio::test]
async fn replacement_must_be_processed() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    let draft = harness
        .engine
        .create_draft(new_document(
            DocumentType::Invoice,
            local(2024, 1, 1, 9),
            vec![line("Plan", "1", "100.00")],
        ))
        .await
        .unwrap();

    let mut request = invalidation_request(invoice.id, InvalidationReason::DataError);
    request.replacement = Some(DocumentRef::Id(draft.id));
    let err = harness.invalidations.invalidate(request).await.unwrap_err();

    assert_eq!(err.code(), "REPLACEMENT_REQUIRED");
}

#[tokio::test]
async fn other_reason_requires_a_motive() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;

    let mut request = invalidation_request(invoice.id, InvalidationReason::Other);
    request.motive = Some("   ".to_string());
    let err = harness.invalidations.invalidate(request).await.unwrap_err();
    assert_eq!(err.code(), "MOTIVE_REQUIRED");

    let mut request = invalidation_request(invoice.id, InvalidationReason::Other);
    request.motive = Some("Duplicated by cashier".to_string());
    let event = harness.invalidations.invalidate(request).await.unwrap();
    assert_eq!(event.motive.as_deref(), Some("Duplicated by cashier"));
}

#[tokio::test]
async fn only_processed_documents_can_be_invalidated() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let draft = harness
        .engine
        .create_draft(new_document(
            DocumentType::Invoice,
            local(2024, 1, 1, 9),
            vec![line("Plan", "1", "100.00")],
        ))
        .await
        .unwrap();

    let err = harness
        .invalidations
        .invalidate(invalidation_request(draft.id, InvalidationReason::Rescind))
        .await
        .unwrap_err();

    assert!(matches!(err, DteError::InvalidState { .. }));
}

#[tokio::test]
async fn concurrent_invalidations_have_exactly_one_winner() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;

    let target = invoice.id;
    let first = harness.invalidations.clone();
    let second = harness.invalidations.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move {
            first
                .invalidate(invalidation_request(target, InvalidationReason::Rescind))
                .await
        }),
        tokio::spawn(async move {
            second
                .invalidate(invalidation_request(target, InvalidationReason::Rescind))
                .await
        }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, DteError::AlreadyInvalidated(id) if *id == invoice.id));

    let events = harness
        .invalidations
        .list_invalidations(invoice.id)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        harness.engine.get(invoice.id).await.unwrap().status,
        DocumentStatus::Invalidated
    );
}

#[tokio::test]
async fn second_invalidation_of_invalidated_document_fails() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap();

    let err = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "ALREADY_INVALIDATED");
}

#[tokio::test]
async fn authority_rejection_frees_the_slot() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    harness
        .gateway
        .reject_next(&["[codigoGeneracion] DOCUMENTO YA ANULADO"]);

    let err = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUTHORITY_REJECTED");
    assert_eq!(
        harness.engine.get(invoice.id).await.unwrap().status,
        DocumentStatus::Processed
    );

    let event = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap();
    assert_eq!(event.status, InvalidationStatus::Processed);

    let events = harness
        .invalidations
        .list_invalidations(invoice.id)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].status, InvalidationStatus::Rejected);
    assert_eq!(
        events[0].rejection_reasons,
        vec!["[codigoGeneracion] DOCUMENTO YA ANULADO".to_string()]
    );
}

#[tokio::test]
async fn transport_failure_is_retried_without_rechecking_the_deadline() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    harness.gateway.fail_next("connection refused");

    harness.set_now(local(2024, 3, 30, 10));
    let err = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let pending = harness
        .invalidations
        .list_invalidations(invoice.id)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(pending.status, InvalidationStatus::Transmitted);
    assert_eq!(
        harness.engine.get(invoice.id).await.unwrap().status,
        DocumentStatus::Processed
    );

    // The slot stays taken while the event is in flight.
    let err = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_INVALIDATED");

    harness.set_now(local(2024, 4, 10, 10));
    let event = harness
        .invalidations
        .retry_transmission(pending.id)
        .await
        .unwrap();

    assert_eq!(event.status, InvalidationStatus::Processed);
    assert_eq!(
        harness.engine.get(invoice.id).await.unwrap().status,
        DocumentStatus::Invalidated
    );
}

#[tokio::test]
async fn signing_failure_leaves_event_pending_for_retry() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    harness.gateway.set_signing_failure(Some("signer unavailable"));

    let err = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TRANSPORT_FAILURE");

    let pending = harness
        .invalidations
        .list_invalidations(invoice.id)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(pending.status, InvalidationStatus::Pending);

    harness.gateway.set_signing_failure(None);
    let event = harness
        .invalidations
        .retry_transmission(pending.id)
        .await
        .unwrap();
    assert_eq!(event.status, InvalidationStatus::Processed);
    assert!(event.signed_payload.is_some());
}

#[tokio::test]
async fn retrying_a_processed_event_is_a_no_op() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    let event = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap();
    let transmits = harness.gateway.transmit_count();

    let again = harness
        .invalidations
        .retry_transmission(event.id)
        .await
        .unwrap();

    assert_eq!(again.status, InvalidationStatus::Processed);
    assert_eq!(harness.gateway.transmit_count(), transmits);
}

#[tokio::test]
async fn ccf_must_be_invalidated_by_next_business_day() {
    // Friday 2024-03-01; the next business day is Monday 2024-03-04.
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let ccf = harness
        .processed(
            DocumentType::FiscalCreditVoucher,
            local(2024, 3, 1, 9),
            vec![line("Router", "1", "50.00")],
        )
        .await;

    harness.set_now(local(2024, 3, 5, 9));
    let err = harness
        .invalidations
        .invalidate(invalidation_request(ccf.id, InvalidationReason::Rescind))
        .await
        .unwrap_err();
    match err {
        DteError::DeadlineExceeded { deadline } => {
            assert_eq!(deadline, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        }
        other => panic!("expected DeadlineExceeded, got {:?}", other),
    }

    harness.set_now(local(2024, 3, 4, 17));
    harness
        .invalidations
        .invalidate(invalidation_request(ccf.id, InvalidationReason::Rescind))
        .await
        .unwrap();
}

#[tokio::test]
async fn unanswered_signer_leaves_event_pending() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    harness.gateway.set_sign_delay(std::time::Duration::from_secs(2));

    let err = harness
        .invalidations
        .invalidate(invalidation_request(invoice.id, InvalidationReason::Rescind))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TRANSPORT_FAILURE");

    let pending = harness
        .invalidations
        .list_invalidations(invoice.id)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(pending.status, InvalidationStatus::Pending);
    assert_eq!(
        harness.engine.get(invoice.id).await.unwrap().status,
        DocumentStatus::Processed
    );
    assert!(harness.locks.is_empty());

    harness.gateway.set_sign_delay(std::time::Duration::ZERO);
    let event = harness
        .invalidations
        .retry_transmission(pending.id)
        .await
        .unwrap();
    assert_eq!(event.status, InvalidationStatus::Processed);
}

#[tokio::test]
async fn aborted_caller_still_finalizes_the_invalidation() {
    let harness = TestHarness::new(local(2024, 1, 1, 9));
    let invoice = processed_invoice(&harness).await;
    harness.set_now(local(2024, 2, 1, 9));
    harness
        .gateway
        .set_delay(std::time::Duration::from_millis(100));

    let invalidations = harness.invalidations.clone();
    let target = invoice.id;
    let caller = tokio::spawn(async move {
        invalidations
            .invalidate(invalidation_request(target, InvalidationReason::Rescind))
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    caller.abort();

    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    let events = harness.invalidations.list_invalidations(invoice.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, InvalidationStatus::Processed);
    assert_eq!(
        harness.engine.get(invoice.id).await.unwrap().status,
        DocumentStatus::Invalidated
    );
}
