//! Line item model for dte-service.

use crate::models::document::round_money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// VAT treatment of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxTreatment {
    Taxed,
    Exempt,
    NotSubject,
}

impl TaxTreatment {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxTreatment::Taxed => "taxed",
            TaxTreatment::Exempt => "exempt",
            TaxTreatment::NotSubject => "not_subject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "taxed" => Some(TaxTreatment::Taxed),
            "exempt" => Some(TaxTreatment::Exempt),
            "not_subject" => Some(TaxTreatment::NotSubject),
            _ => None,
        }
    }
}

/// Line item on a fiscal document. `unit_price` is always net of tax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_id: Uuid,
    pub line_number: i32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_treatment: TaxTreatment,
    /// Line of the original document this note line credits or debits.
    pub original_line_id: Option<Uuid>,
    pub motive: Option<String>,
}

impl LineItem {
    pub fn amount(&self) -> Decimal {
        round_money(self.quantity * self.unit_price)
    }
}
