//! Canonical JSON handed to the signer.

use crate::models::{FiscalDocument, InvalidationEvent};
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{json, Value};

fn upper(id: uuid::Uuid) -> String {
    id.to_string().to_uppercase()
}

fn local_parts(at: DateTime<Utc>, offset: FixedOffset) -> (String, String) {
    let local = at.with_timezone(&offset);
    (
        local.format("%Y-%m-%d").to_string(),
        local.format("%H:%M:%S").to_string(),
    )
}

/// Document body: identification, receiver, line items and summary.
///
/// Notes reference `related`, the original they adjust, by its generation code.
pub fn document_payload(
    document: &FiscalDocument,
    related: Option<&FiscalDocument>,
    environment: &str,
    offset: FixedOffset,
) -> Value {
    let (issue_date, issue_time) = local_parts(document.issued_at, offset);

    let items: Vec<Value> = document
        .lines
        .iter()
        .map(|line| {
            json!({
                "numItem": line.line_number,
                "descripcion": line.description,
                "cantidad": line.quantity,
                "precioUni": line.unit_price,
                "tratamiento": line.tax_treatment.as_str(),
                "monto": line.amount(),
            })
        })
        .collect();

    json!({
        "identificacion": {
            "ambiente": environment,
            "tipoDte": document.document_type.code(),
            "numeroControl": document.control_number,
            "codigoGeneracion": upper(document.generation_code),
            "fecEmi": issue_date,
            "horEmi": issue_time,
            "tipoMoneda": document.currency,
        },
        "documentoRelacionado": related.map(|r| json!({
            "tipoDocumento": r.document_type.code(),
            "numeroDocumento": upper(r.generation_code),
            "fechaEmision": local_parts(r.issued_at, offset).0,
        })),
        "receptor": {
            "nit": document.counterparty.tax_id,
            "nrc": document.counterparty.nrc,
            "nombre": document.counterparty.name,
            "tipoDocumento": document.counterparty.id_document_type,
        },
        "cuerpoDocumento": items,
        "resumen": {
            "totalGravada": document.summary.taxed,
            "totalExenta": document.summary.exempt,
            "totalNoSuj": document.summary.not_subject,
            "totalIva": document.summary.tax,
            "montoTotalOperacion": document.summary.total,
        },
        "extension": {
            "observaciones": document.observations,
        },
    })
}

/// Invalidation body referencing the target and, for data errors, its replacement.
pub fn invalidation_payload(
    event: &InvalidationEvent,
    target: &FiscalDocument,
    replacement: Option<&FiscalDocument>,
    environment: &str,
    offset: FixedOffset,
) -> Value {
    let (date, time) = local_parts(event.created_utc, offset);
    let (issue_date, _) = local_parts(target.issued_at, offset);

    json!({
        "identificacion": {
            "version": 2,
            "ambiente": environment,
            "codigoGeneracion": upper(event.generation_code),
            "fecAnula": date,
            "horAnula": time,
        },
        "documento": {
            "tipoDte": target.document_type.code(),
            "codigoGeneracion": upper(target.generation_code),
            "selloRecibido": target.receipt.as_ref().map(|r| r.reception_stamp.clone()),
            "numeroControl": target.control_number,
            "fecEmi": issue_date,
            "montoIva": target.summary.tax,
            "codigoGeneracionR": replacement.map(|r| upper(r.generation_code)),
            "tipoDocumento": target.counterparty.id_document_type,
            "numDocumento": target.counterparty.tax_id,
            "nombre": target.counterparty.name,
        },
        "motivo": {
            "tipoAnulacion": event.reason.code(),
            "motivoAnulacion": event.motive,
            "nombreResponsable": event.responsible.name,
            "tipDocResponsable": event.responsible.id_document_type,
            "numDocResponsable": event.responsible.id_document_number,
            "nombreSolicita": event.requester.name,
            "tipDocSolicita": event.requester.id_document_type,
            "numDocSolicita": event.requester.id_document_number,
        },
    })
}
