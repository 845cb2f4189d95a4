//! Application startup and lifecycle management.

use crate::config::{DteConfig, StorageBackend};
use crate::handlers::{self, documents, invalidations, ledger};
use crate::middleware::http_metrics_middleware;
use crate::services::deadline::fiscal_offset;
use crate::services::{
    Clock, Database, DeadlinePolicy, DocumentLocks, DocumentRepository, DteEngine,
    EngineSettings, FixedHolidays, HttpTaxAuthorityGateway, InMemoryDocumentRepository,
    InvalidationEngine, LedgerAggregator, NoteComposer, SystemClock, TaxAuthorityGateway,
};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{make_request_span, request_id_middleware};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: DteConfig,
    pub repository: Arc<dyn DocumentRepository>,
    pub engine: DteEngine,
    pub invalidations: InvalidationEngine,
    pub notes: NoteComposer,
    pub ledger: LedgerAggregator,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/documents", post(documents::create_document))
        .route("/documents/:id", get(documents::get_document))
        .route(
            "/documents/by-generation-code/:code",
            get(documents::get_document_by_generation_code),
        )
        .route("/documents/:id/sign", post(documents::sign_document))
        .route("/documents/:id/transmit", post(documents::transmit_document))
        .route("/documents/:id/submit", post(documents::submit_document))
        .route("/documents/:id/resubmit", post(documents::resubmit_document))
        .route("/documents/:id/notes", post(documents::compose_note))
        .route(
            "/documents/:id/invalidations",
            get(documents::list_document_invalidations),
        )
        .route("/invalidations", post(invalidations::create_invalidation))
        .route("/invalidations/:id", get(invalidations::get_invalidation))
        .route(
            "/invalidations/:id/retry",
            post(invalidations::retry_invalidation),
        )
        .route("/ledgers/:kind", get(ledger::get_ledger))
        .route("/ledgers/:kind/export", get(ledger::export_ledger))
        .layer(from_fn(http_metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<axum::body::Body>))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the configured storage and the HTTP gateway.
    pub async fn build(config: DteConfig) -> Result<Self, AppError> {
        let repository: Arc<dyn DocumentRepository> = match config.storage {
            StorageBackend::Postgres => {
                let db_config = config.database.as_ref().ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "DATABASE_URL is required for postgres storage"
                    ))
                })?;
                let db = Database::new(
                    &db_config.url,
                    db_config.max_connections,
                    db_config.min_connections,
                )
                .await?;
                db.run_migrations().await?;
                Arc::new(db)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; documents are lost on restart");
                Arc::new(InMemoryDocumentRepository::new())
            }
        };

        let gateway = HttpTaxAuthorityGateway::new(
            config.authority.clone(),
            fiscal_offset(config.tax.utc_offset_minutes),
        )
        .map_err(|e| {
            tracing::error!("Failed to build authority gateway: {}", e);
            AppError::ConfigError(anyhow::anyhow!("Authority gateway error: {}", e))
        })?;

        Self::build_with(config, repository, Arc::new(gateway), Arc::new(SystemClock)).await
    }

    /// Build around explicit collaborators. Tests use this with the in-memory
    /// repository, the mock gateway and a fixed clock.
    pub async fn build_with(
        config: DteConfig,
        repository: Arc<dyn DocumentRepository>,
        gateway: Arc<dyn TaxAuthorityGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let offset = fiscal_offset(config.tax.utc_offset_minutes);
        let policy = DeadlinePolicy::new(
            Arc::new(FixedHolidays::new(config.tax.holidays.iter().copied())),
            offset,
        );
        let settings = EngineSettings {
            vat_rate: config.tax.vat_rate,
            authority_timeout: Duration::from_secs(config.authority.timeout_secs),
            environment: config.authority.environment.clone(),
            default_establishment: config.tax.default_establishment.clone(),
            fiscal_offset: offset,
        };

        let engine = DteEngine::new(
            repository.clone(),
            gateway.clone(),
            Arc::new(DocumentLocks::new()),
            clock,
            settings,
        );
        let state = AppState {
            config: config.clone(),
            repository: repository.clone(),
            invalidations: InvalidationEngine::new(engine.clone(), gateway, policy.clone()),
            notes: NoteComposer::new(engine.clone()),
            ledger: LedgerAggregator::new(repository, policy),
            engine,
        };

        // Port 0 binds a random port for tests.
        let addr = format!("{}:{}", config.common.host, config.common.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let http_port = listener.local_addr()?.port();

        tracing::info!(http_port, storage = ?config.storage, "dte-service listening");

        Ok(Self {
            http_port,
            listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, router(self.state)).await
    }
}
