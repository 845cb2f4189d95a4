use crate::models::{LedgerKind, LedgerQuery};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

fn default_only_processed() -> bool {
    true
}

/// Query string of `GET /ledgers/:kind` and its CSV export.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerParams {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub branch_id: Option<Uuid>,
    #[serde(default = "default_only_processed")]
    pub only_processed: bool,
}

impl LedgerParams {
    pub fn into_query(self, kind: LedgerKind) -> LedgerQuery {
        LedgerQuery {
            kind,
            period_start: self.period_start,
            period_end: self.period_end,
            branch_id: self.branch_id,
            only_processed: self.only_processed,
        }
    }
}
