//! VAT ledger (Libro de IVA) projections.

use crate::models::document::DocumentType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Electronic documents are class 4 in every statutory annex.
pub const DOCUMENT_CLASS_ELECTRONIC: &str = "4";
/// Operation type column: taxed operation.
pub const OPERATION_TYPE_TAXED: &str = "1";
/// Income type column: commercial income.
pub const INCOME_TYPE_COMMERCIAL: &str = "3";

/// Statutory report variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    ContributorSales,
    FinalConsumerSales,
    ExcludedSubjectPurchases,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::ContributorSales => "contributor_sales",
            LedgerKind::FinalConsumerSales => "final_consumer_sales",
            LedgerKind::ExcludedSubjectPurchases => "excluded_subject_purchases",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contributor_sales" => Some(LedgerKind::ContributorSales),
            "final_consumer_sales" => Some(LedgerKind::FinalConsumerSales),
            "excluded_subject_purchases" => Some(LedgerKind::ExcludedSubjectPurchases),
            _ => None,
        }
    }

    pub fn document_types(&self) -> &'static [DocumentType] {
        match self {
            LedgerKind::ContributorSales => &[DocumentType::FiscalCreditVoucher],
            LedgerKind::FinalConsumerSales => &[DocumentType::Invoice],
            LedgerKind::ExcludedSubjectPurchases => &[DocumentType::ExcludedSubjectVoucher],
        }
    }

    pub fn annex_number(&self) -> &'static str {
        match self {
            LedgerKind::ContributorSales => "1",
            LedgerKind::FinalConsumerSales => "2",
            LedgerKind::ExcludedSubjectPurchases => "5",
        }
    }

    /// Only the contributor report carries the tax-debit column.
    pub fn has_tax_debit(&self) -> bool {
        matches!(self, LedgerKind::ContributorSales)
    }
}

/// Ledger query parameters.
#[derive(Debug, Clone)]
pub struct LedgerQuery {
    pub kind: LedgerKind,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub branch_id: Option<Uuid>,
    /// Defaults to true; `false` is for internal review only and also lists
    /// invalidated documents.
    pub only_processed: bool,
}

/// One ledger record. Monetary cells are pre-formatted with two decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub row_number: u32,
    pub emission_date: String,
    pub document_class: String,
    pub document_type_code: String,
    pub resolution_number: String,
    pub reception_stamp: String,
    pub document_number: String,
    pub internal_control_number: String,
    pub counterparty_tax_id: String,
    pub counterparty_name: String,
    pub exempt: String,
    pub not_subject: String,
    pub taxed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_debit: Option<String>,
    pub total: String,
    pub operation_type: String,
    pub income_type: String,
    pub annex_number: String,
}

impl LedgerRow {
    /// Cells in statutory column order.
    pub fn cells(&self) -> Vec<&str> {
        let mut cells = vec![
            self.emission_date.as_str(),
            self.document_class.as_str(),
            self.document_type_code.as_str(),
            self.resolution_number.as_str(),
            self.reception_stamp.as_str(),
            self.document_number.as_str(),
            self.internal_control_number.as_str(),
            self.counterparty_tax_id.as_str(),
            self.counterparty_name.as_str(),
            self.exempt.as_str(),
            self.not_subject.as_str(),
            self.taxed.as_str(),
        ];
        if let Some(ref tax_debit) = self.tax_debit {
            cells.push(tax_debit.as_str());
        }
        cells.push(self.total.as_str());
        cells.push(self.operation_type.as_str());
        cells.push(self.income_type.as_str());
        cells.push(self.annex_number.as_str());
        cells
    }
}

/// Trailing totals record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub exempt: String,
    pub not_subject: String,
    pub taxed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_debit: Option<String>,
    pub total: String,
}

/// Ledger report for one period and kind; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerReport {
    pub kind: LedgerKind,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub branch_id: Option<Uuid>,
    pub rows: Vec<LedgerRow>,
    pub totals: LedgerTotals,
}
