//! VAT ledger (Libro de IVA) projections over accepted documents.

use crate::error::{DteError, ValidationCode};
use crate::models::{
    round_money, DocumentStatus, FiscalDocument, LedgerKind, LedgerQuery, LedgerReport,
    LedgerRow, LedgerTotals, DOCUMENT_CLASS_ELECTRONIC, INCOME_TYPE_COMMERCIAL,
    OPERATION_TYPE_TAXED,
};
use crate::services::deadline::DeadlinePolicy;
use crate::services::repository::{DocumentFilter, DocumentRepository};
use csv::WriterBuilder;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};

/// Two decimals, half away from zero.
pub fn format_money(value: Decimal) -> String {
    format!("{:.2}", round_money(value))
}

#[derive(Clone)]
pub struct LedgerAggregator {
    repo: Arc<dyn DocumentRepository>,
    policy: DeadlinePolicy,
}

#[derive(Default)]
struct Sums {
    exempt: Decimal,
    not_subject: Decimal,
    taxed: Decimal,
    tax: Decimal,
    total: Decimal,
}

impl LedgerAggregator {
    pub fn new(repo: Arc<dyn DocumentRepository>, policy: DeadlinePolicy) -> Self {
        Self { repo, policy }
    }

    #[instrument(
        skip(self, query),
        fields(kind = query.kind.as_str(), start = %query.period_start, end = %query.period_end)
    )]
    pub async fn build_ledger(&self, query: LedgerQuery) -> Result<LedgerReport, DteError> {
        if query.period_start > query.period_end {
            return Err(DteError::validation(
                ValidationCode::InvalidField,
                format!(
                    "period start {} is after period end {}",
                    query.period_start, query.period_end
                ),
            ));
        }

        let until = query
            .period_end
            .succ_opt()
            .map(|next| self.policy.day_start(next))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

        let statuses = if query.only_processed {
            vec![DocumentStatus::Processed]
        } else {
            vec![DocumentStatus::Processed, DocumentStatus::Invalidated]
        };

        let mut documents = self
            .repo
            .list_documents(&DocumentFilter {
                document_types: query.kind.document_types().to_vec(),
                statuses,
                issued_from: Some(self.policy.day_start(query.period_start)),
                issued_until: Some(until),
                branch_id: query.branch_id,
            })
            .await?;
        // Rows are numbered by local issue date, then generation code.
        documents.sort_by_key(|d| (self.policy.local_date(d.issued_at), d.generation_code));

        let mut sums = Sums::default();
        let rows: Vec<LedgerRow> = documents
            .iter()
            .enumerate()
            .map(|(index, document)| {
                sums.exempt += round_money(document.summary.exempt);
                sums.not_subject += round_money(document.summary.not_subject);
                sums.taxed += round_money(document.summary.taxed);
                sums.tax += round_money(document.summary.tax);
                sums.total += round_money(document.summary.total);
                self.row(query.kind, index as u32 + 1, document)
            })
            .collect();

        let totals = LedgerTotals {
            exempt: format_money(sums.exempt),
            not_subject: format_money(sums.not_subject),
            taxed: format_money(sums.taxed),
            tax_debit: query.kind.has_tax_debit().then(|| format_money(sums.tax)),
            total: format_money(sums.total),
        };

        info!(rows = rows.len(), total = %totals.total, "Ledger built");

        Ok(LedgerReport {
            kind: query.kind,
            period_start: query.period_start,
            period_end: query.period_end,
            branch_id: query.branch_id,
            rows,
            totals,
        })
    }

    fn row(&self, kind: LedgerKind, row_number: u32, document: &FiscalDocument) -> LedgerRow {
        let summary = &document.summary;
        LedgerRow {
            row_number,
            emission_date: self
                .policy
                .local_date(document.issued_at)
                .format("%d/%m/%Y")
                .to_string(),
            document_class: DOCUMENT_CLASS_ELECTRONIC.to_string(),
            document_type_code: document.document_type.code().to_string(),
            resolution_number: document.control_number.clone(),
            reception_stamp: document
                .receipt
                .as_ref()
                .map(|r| r.reception_stamp.clone())
                .unwrap_or_default(),
            document_number: document.generation_code.to_string().to_uppercase(),
            internal_control_number: String::new(),
            counterparty_tax_id: document.counterparty.tax_id.clone(),
            counterparty_name: document.counterparty.name.clone(),
            exempt: format_money(summary.exempt),
            not_subject: format_money(summary.not_subject),
            taxed: format_money(summary.taxed),
            tax_debit: kind.has_tax_debit().then(|| format_money(summary.tax)),
            total: format_money(summary.total),
            operation_type: OPERATION_TYPE_TAXED.to_string(),
            income_type: INCOME_TYPE_COMMERCIAL.to_string(),
            annex_number: kind.annex_number().to_string(),
        }
    }
}

/// Semicolon-separated statutory export: one record per row, no header and
/// no totals record.
pub fn to_csv(report: &LedgerReport) -> anyhow::Result<String> {
    let mut writer = WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(Vec::new());

    for row in &report.rows {
        let mut record = vec![row.row_number.to_string()];
        record.extend(row.cells().into_iter().map(str::to_string));
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush ledger export: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn money_always_has_two_decimals() {
        assert_eq!(format_money(Decimal::from(113)), "113.00");
        assert_eq!(format_money(Decimal::from_str("0.5").unwrap()), "0.50");
        assert_eq!(format_money(Decimal::from_str("2.005").unwrap()), "2.01");
        assert_eq!(format_money(Decimal::ZERO), "0.00");
    }

    fn row(kind: LedgerKind) -> LedgerRow {
        LedgerRow {
            row_number: 1,
            emission_date: "01/01/2024".to_string(),
            document_class: DOCUMENT_CLASS_ELECTRONIC.to_string(),
            document_type_code: "03".to_string(),
            resolution_number: "DTE-03-M001P001-000000000000001".to_string(),
            reception_stamp: "2024ABC".to_string(),
            document_number: "0D3C7E8A-0000-0000-0000-000000000001".to_string(),
            internal_control_number: String::new(),
            counterparty_tax_id: "06142803901121".to_string(),
            counterparty_name: "Empresa; S.A.".to_string(),
            exempt: "0.00".to_string(),
            not_subject: "0.00".to_string(),
            taxed: "100.00".to_string(),
            tax_debit: kind.has_tax_debit().then(|| "13.00".to_string()),
            total: "113.00".to_string(),
            operation_type: OPERATION_TYPE_TAXED.to_string(),
            income_type: INCOME_TYPE_COMMERCIAL.to_string(),
            annex_number: kind.annex_number().to_string(),
        }
    }

    #[test]
    fn contributor_csv_has_tax_debit_column_and_quotes_delimiters() {
        let report = LedgerReport {
            kind: LedgerKind::ContributorSales,
            period_start: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            period_end: chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            branch_id: None,
            rows: vec![row(LedgerKind::ContributorSales)],
            totals: LedgerTotals {
                exempt: "0.00".to_string(),
                not_subject: "0.00".to_string(),
                taxed: "100.00".to_string(),
                tax_debit: Some("13.00".to_string()),
                total: "113.00".to_string(),
            },
        };

        let csv = to_csv(&report).unwrap();
        assert_eq!(
            csv,
            "1;01/01/2024;4;03;DTE-03-M001P001-000000000000001;2024ABC;\
             0D3C7E8A-0000-0000-0000-000000000001;;06142803901121;\"Empresa; S.A.\";\
             0.00;0.00;100.00;13.00;113.00;1;3;1\n"
        );
    }

    #[test]
    fn consumer_rows_have_no_tax_debit_cell() {
        let consumer_row = row(LedgerKind::FinalConsumerSales);
        let cells = consumer_row.cells();
        assert_eq!(cells.len(), 16);
        assert_eq!(cells.last(), Some(&"2"));
    }
}
