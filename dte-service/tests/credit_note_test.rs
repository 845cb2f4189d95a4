//! Credit/debit note composition integration tests.

mod common;

use common::{dec, invalidation_request, line, local, TestHarness};
use dte_service::models::{
    DocumentStatus, DocumentType, FiscalDocument, InvalidationReason, NoteKind,
    NoteLineSelection, NoteRequest,
};
use dte_service::services::DocumentRepository;
use dte_service::DteError;
use uuid::Uuid;

async fn processed_ccf(harness: &TestHarness) -> FiscalDocument {
    harness
        .processed(
            DocumentType::FiscalCreditVoucher,
            local(2024, 3, 1, 9),
            vec![
                line("Router AX3000", "10", "10.00"),
                line("Installation", "1", "25.00"),
            ],
        )
        .await
}

fn note_request(kind: NoteKind, original: &FiscalDocument, quantity: &str) -> NoteRequest {
    NoteRequest {
        kind,
        original_document_id: original.id,
        lines: vec![NoteLineSelection {
            original_line_id: original.lines[0].line_id,
            quantity: dec(quantity),
            motive: Some("Returned units".to_string()),
        }],
        observations: None,
    }
}

#[tokio::test]
async fn credit_note_copies_price_and_treatment_from_the_original() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let ccf = processed_ccf(&harness).await;

    harness.set_now(local(2024, 3, 8, 11));
    let note = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "6"))
        .await
        .unwrap();

    assert_eq!(note.document_type, DocumentType::CreditNote);
    assert_eq!(note.status, DocumentStatus::Draft);
    assert_eq!(note.original_document_id, Some(ccf.id));
    assert_eq!(note.control_number, "DTE-05-M001P001-000000000000001");
    assert_eq!(note.issued_at, local(2024, 3, 8, 11));
    assert_eq!(note.counterparty, ccf.counterparty);
    assert_eq!(note.lines.len(), 1);
    assert_eq!(note.lines[0].original_line_id, Some(ccf.lines[0].line_id));
    assert_eq!(note.lines[0].unit_price, dec("10.00"));
    assert_eq!(note.summary.taxed, dec("60.00"));
    assert_eq!(note.summary.tax, dec("7.80"));
    assert_eq!(note.summary.total, dec("67.80"));
}

#[tokio::test]
async fn credited_quantity_cannot_exceed_what_remains() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let ccf = processed_ccf(&harness).await;

    let prior = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "4"))
        .await
        .unwrap();
    harness.engine.submit(prior.id).await.unwrap();

    let err = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "7"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QUANTITY_EXCEEDS_AVAILABLE");

    harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "6"))
        .await
        .unwrap();

    let err = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "0.5"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QUANTITY_EXCEEDS_AVAILABLE");
}

#[tokio::test]
async fn repeated_selection_of_a_line_is_summed() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let ccf = processed_ccf(&harness).await;

    let mut request = note_request(NoteKind::Credit, &ccf, "6");
    request.lines.push(NoteLineSelection {
        original_line_id: ccf.lines[0].line_id,
        quantity: dec("5"),
        motive: None,
    });
    let err = harness.notes.compose_note(request).await.unwrap_err();

    assert_eq!(err.code(), "QUANTITY_EXCEEDS_AVAILABLE");
}

#[tokio::test]
async fn rejected_credit_notes_release_their_quantity() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let ccf = processed_ccf(&harness).await;

    let rejected = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "10"))
        .await
        .unwrap();
    harness.gateway.reject_next(&["[cuerpoDocumento] MONTO INVALIDO"]);
    let err = harness.engine.submit(rejected.id).await.unwrap_err();
    assert_eq!(err.code(), "AUTHORITY_REJECTED");

    let note = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "10"))
        .await
        .unwrap();
    assert_eq!(note.lines[0].quantity, dec("10"));
}

#[tokio::test]
async fn debit_notes_are_bounded_by_the_original_quantity_only() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let ccf = processed_ccf(&harness).await;
    harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "4"))
        .await
        .unwrap();

    let debit = harness
        .notes
        .compose_note(note_request(NoteKind::Debit, &ccf, "10"))
        .await
        .unwrap();
    assert_eq!(debit.document_type, DocumentType::DebitNote);
    assert_eq!(debit.control_number, "DTE-06-M001P001-000000000000001");

    let err = harness
        .notes
        .compose_note(note_request(NoteKind::Debit, &ccf, "11"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QUANTITY_EXCEEDS_AVAILABLE");
}

#[tokio::test]
async fn invalidated_original_cannot_take_notes() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let ccf = processed_ccf(&harness).await;
    harness
        .invalidations
        .invalidate(invalidation_request(ccf.id, InvalidationReason::Rescind))
        .await
        .unwrap();

    let err = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "1"))
        .await
        .unwrap_err();

    assert!(matches!(err, DteError::InvalidState { .. }));
}

#[tokio::test]
async fn invoices_do_not_accept_notes() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let invoice = harness
        .processed(
            DocumentType::Invoice,
            local(2024, 3, 1, 9),
            vec![line("Plan", "10", "10.00")],
        )
        .await;

    let err = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &invoice, "1"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INCOMPATIBLE_ORIGINAL");
}

#[tokio::test]
async fn selections_are_validated_before_anything_is_stored() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let ccf = processed_ccf(&harness).await;

    let mut empty = note_request(NoteKind::Credit, &ccf, "1");
    empty.lines.clear();
    assert_eq!(
        harness.notes.compose_note(empty).await.unwrap_err().code(),
        "NO_LINES_SELECTED"
    );

    let mut unknown = note_request(NoteKind::Credit, &ccf, "1");
    unknown.lines[0].original_line_id = Uuid::new_v4();
    assert_eq!(
        harness.notes.compose_note(unknown).await.unwrap_err().code(),
        "UNKNOWN_ORIGINAL_LINE"
    );

    assert_eq!(
        harness
            .notes
            .compose_note(note_request(NoteKind::Credit, &ccf, "0"))
            .await
            .unwrap_err()
            .code(),
        "INVALID_QUANTITY"
    );

    let notes = harness
        .engine
        .repository()
        .list_notes_for(ccf.id)
        .await
        .unwrap();
    assert!(notes.is_empty());
}

#[tokio::test]
async fn draft_original_is_an_invalid_state() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let draft = harness
        .engine
        .create_draft(common::new_document(
            DocumentType::FiscalCreditVoucher,
            local(2024, 3, 1, 9),
            vec![line("Router", "1", "10.00")],
        ))
        .await
        .unwrap();

    let err = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &draft, "1"))
        .await
        .unwrap_err();

    assert!(matches!(err, DteError::InvalidState { .. }));
}

#[tokio::test]
async fn signed_note_references_the_original_generation_code() {
    let harness = TestHarness::new(local(2024, 3, 1, 9));
    let ccf = processed_ccf(&harness).await;
    let note = harness
        .notes
        .compose_note(note_request(NoteKind::Credit, &ccf, "2"))
        .await
        .unwrap();

    harness.engine.sign(note.id).await.unwrap();

    let payloads = harness.gateway.signed_payloads();
    let related = &payloads.last().unwrap()["documentoRelacionado"];
    assert_eq!(
        related["numeroDocumento"],
        ccf.generation_code.to_string().to_uppercase()
    );
    assert_eq!(related["tipoDocumento"], "03");
    assert_eq!(related["fechaEmision"], "2024-03-01");
    assert_ne!(
        related["numeroDocumento"],
        ccf.id.to_string().to_uppercase()
    );

    assert!(payloads[0]["documentoRelacionado"].is_null());
}
