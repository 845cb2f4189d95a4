#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use dte_service::config::{AuthorityConfig, DteConfig, StorageBackend, TaxConfig};
use dte_service::models::{
    Counterparty, DocumentType, FiscalDocument, InvalidationReason, InvalidationRequest,
    NewDocument, NewLine, Party, TaxTreatment,
};
use dte_service::services::deadline::fiscal_offset;
use dte_service::services::{
    DeadlinePolicy, DocumentLocks, DteEngine, EngineSettings, FixedClock,
    InMemoryDocumentRepository, InvalidationEngine, LedgerAggregator, MockTaxAuthorityGateway,
    NoHolidays, NoteComposer,
};
use dte_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CoreConfig;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// UTC instant for a local (UTC-06:00) wall-clock time.
pub fn local(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap() + chrono::Duration::hours(6)
}

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

pub fn counterparty() -> Counterparty {
    Counterparty {
        tax_id: "06142803901121".to_string(),
        name: "Distribuidora El Sol S.A. de C.V.".to_string(),
        id_document_type: "36".to_string(),
        nrc: Some("1234-5".to_string()),
    }
}

pub fn line(description: &str, quantity: &str, unit_price: &str) -> NewLine {
    NewLine {
        description: description.to_string(),
        quantity: dec(quantity),
        unit_price: dec(unit_price),
        tax_treatment: TaxTreatment::Taxed,
    }
}

pub fn new_document(
    document_type: DocumentType,
    issued_at: DateTime<Utc>,
    lines: Vec<NewLine>,
) -> NewDocument {
    NewDocument {
        document_type,
        branch_id: None,
        establishment_code: None,
        issued_at: Some(issued_at),
        currency: None,
        counterparty: counterparty(),
        lines,
        observations: None,
    }
}

pub fn party(name: &str) -> Party {
    Party {
        name: name.to_string(),
        id_document_type: "13".to_string(),
        id_document_number: "01234567-8".to_string(),
    }
}

pub fn invalidation_request(
    target_document_id: Uuid,
    reason: InvalidationReason,
) -> InvalidationRequest {
    InvalidationRequest {
        target_document_id,
        reason,
        motive: None,
        replacement: None,
        responsible: party("Ana Pérez"),
        requester: party("Luis Gómez"),
    }
}

/// Engines wired to the in-memory repository, the mock gateway and a fixed clock.
pub struct TestHarness {
    pub repo: Arc<InMemoryDocumentRepository>,
    pub gateway: Arc<MockTaxAuthorityGateway>,
    pub clock: Arc<FixedClock>,
    pub locks: Arc<DocumentLocks>,
    pub engine: DteEngine,
    pub invalidations: InvalidationEngine,
    pub notes: NoteComposer,
    pub ledger: LedgerAggregator,
}

impl TestHarness {
    pub fn new(now: DateTime<Utc>) -> Self {
        let repo = Arc::new(InMemoryDocumentRepository::new());
        let gateway = Arc::new(MockTaxAuthorityGateway::new());
        let clock = Arc::new(FixedClock::new(now));
        let settings = EngineSettings {
            authority_timeout: Duration::from_millis(300),
            ..EngineSettings::default()
        };
        let locks = Arc::new(DocumentLocks::new());
        let engine = DteEngine::new(
            repo.clone(),
            gateway.clone(),
            locks.clone(),
            clock.clone(),
            settings,
        );
        let policy = DeadlinePolicy::new(Arc::new(NoHolidays), fiscal_offset(-360));

        Self {
            invalidations: InvalidationEngine::new(engine.clone(), gateway.clone(), policy.clone()),
            notes: NoteComposer::new(engine.clone()),
            ledger: LedgerAggregator::new(repo.clone(), policy),
            repo,
            gateway,
            clock,
            locks,
            engine,
        }
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.clock.set(now);
    }

    /// Create a draft issued at `issued_at` and drive it to PROCESSED.
    pub async fn processed(
        &self,
        document_type: DocumentType,
        issued_at: DateTime<Utc>,
        lines: Vec<NewLine>,
    ) -> FiscalDocument {
        let draft = self
            .engine
            .create_draft(new_document(document_type, issued_at, lines))
            .await
            .expect("Failed to create draft");
        self.engine
            .submit(draft.id)
            .await
            .expect("Failed to submit document")
    }
}

pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
    pub gateway: Arc<MockTaxAuthorityGateway>,
    pub clock: Arc<FixedClock>,
}

impl TestApp {
    pub async fn spawn(now: DateTime<Utc>) -> Self {
        let config = DteConfig {
            common: CoreConfig {
                port: 0, // Random port for testing
                host: "127.0.0.1".to_string(),
            },
            service_name: "dte-service".to_string(),
            service_version: "test".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            storage: StorageBackend::Memory,
            database: None,
            authority: AuthorityConfig::local(),
            tax: TaxConfig::default(),
        };

        let gateway = Arc::new(MockTaxAuthorityGateway::new());
        let clock = Arc::new(FixedClock::new(now));
        let app = Application::build_with(
            config,
            Arc::new(InMemoryDocumentRepository::new()),
            gateway.clone(),
            clock.clone(),
        )
        .await
        .expect("Failed to build test application");

        let http_port = app.http_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            http_port,
            gateway,
            clock,
        }
    }
}
