//! Services module for dte-service.

pub mod clock;
pub mod database;
pub mod deadline;
pub mod gateway;
pub mod invalidation;
pub mod ledger;
pub mod lifecycle;
pub mod locks;
pub mod metrics;
pub mod notes;
pub mod payload;
pub mod repository;

pub use clock::{Clock, FixedClock, SystemClock};
pub use database::Database;
pub use deadline::{DeadlinePolicy, FixedHolidays, HolidayCalendar, InvalidationWindow, NoHolidays};
pub use gateway::{HttpTaxAuthorityGateway, MockTaxAuthorityGateway, TaxAuthorityGateway};
pub use invalidation::InvalidationEngine;
pub use ledger::{to_csv, LedgerAggregator};
pub use lifecycle::{DteEngine, EngineSettings};
pub use locks::DocumentLocks;
pub use metrics::{get_metrics, init_metrics};
pub use notes::NoteComposer;
pub use repository::{DocumentFilter, DocumentRepository, InMemoryDocumentRepository};
