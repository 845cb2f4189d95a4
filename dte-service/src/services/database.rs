//! PostgreSQL document repository for dte-service.

use crate::error::RepositoryError;
use crate::models::{
    AuthorityReceipt, Counterparty, DocumentStatus, DocumentType, FiscalDocument,
    InvalidationEvent, InvalidationReason, InvalidationStatus, LineItem, MonetarySummary, Party,
    TaxTreatment,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{DocumentFilter, DocumentRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const DOCUMENT_COLUMNS: &str = r#"
    document_id, generation_code, document_type, control_number, status, branch_id,
    establishment_code, issued_at, currency, counterparty_tax_id, counterparty_name,
    counterparty_id_type, counterparty_nrc, taxed, exempt, not_subject, tax, total,
    original_document_id, replacement_document_id, signed_payload, reception_stamp,
    processed_at, authority_observations, rejection_reasons, observations, version,
    created_utc, updated_utc
"#;

const INVALIDATION_COLUMNS: &str = r#"
    invalidation_id, generation_code, target_document_id, reason_code, motive,
    replacement_document_id, responsible_name, responsible_doc_type, responsible_doc_number,
    requester_name, requester_doc_type, requester_doc_number, status, signed_payload,
    reception_stamp, processed_at, authority_observations, rejection_reasons,
    created_utc, updated_utc
"#;

#[derive(Debug, FromRow)]
struct DocumentRow {
    document_id: Uuid,
    generation_code: Uuid,
    document_type: String,
    control_number: String,
    status: String,
    branch_id: Option<Uuid>,
    establishment_code: String,
    issued_at: DateTime<Utc>,
    currency: String,
    counterparty_tax_id: String,
    counterparty_name: String,
    counterparty_id_type: String,
    counterparty_nrc: Option<String>,
    taxed: Decimal,
    exempt: Decimal,
    not_subject: Decimal,
    tax: Decimal,
    total: Decimal,
    original_document_id: Option<Uuid>,
    replacement_document_id: Option<Uuid>,
    signed_payload: Option<String>,
    reception_stamp: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    authority_observations: Vec<String>,
    rejection_reasons: Vec<String>,
    observations: Option<String>,
    version: i64,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct LineRow {
    line_id: Uuid,
    document_id: Uuid,
    line_number: i32,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    tax_treatment: String,
    original_line_id: Option<Uuid>,
    motive: Option<String>,
}

#[derive(Debug, FromRow)]
struct InvalidationRow {
    invalidation_id: Uuid,
    generation_code: Uuid,
    target_document_id: Uuid,
    reason_code: i16,
    motive: Option<String>,
    replacement_document_id: Option<Uuid>,
    responsible_name: String,
    responsible_doc_type: String,
    responsible_doc_number: String,
    requester_name: String,
    requester_doc_type: String,
    requester_doc_number: String,
    status: String,
    signed_payload: Option<String>,
    reception_stamp: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    authority_observations: Vec<String>,
    rejection_reasons: Vec<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

fn receipt(
    reception_stamp: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    observations: Vec<String>,
) -> Option<AuthorityReceipt> {
    match (reception_stamp, processed_at) {
        (Some(reception_stamp), Some(processed_at)) => Some(AuthorityReceipt {
            reception_stamp,
            processed_at,
            observations,
        }),
        _ => None,
    }
}

impl DocumentRow {
    fn into_document(self, lines: Vec<LineItem>) -> Result<FiscalDocument, RepositoryError> {
        let document_type = DocumentType::from_code(&self.document_type).ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "document {} has unknown type '{}'",
                self.document_id, self.document_type
            ))
        })?;
        let status = DocumentStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "document {} has unknown status '{}'",
                self.document_id, self.status
            ))
        })?;

        Ok(FiscalDocument {
            id: self.document_id,
            generation_code: self.generation_code,
            document_type,
            control_number: self.control_number,
            status,
            branch_id: self.branch_id,
            establishment_code: self.establishment_code,
            issued_at: self.issued_at,
            currency: self.currency,
            counterparty: Counterparty {
                tax_id: self.counterparty_tax_id,
                name: self.counterparty_name,
                id_document_type: self.counterparty_id_type,
                nrc: self.counterparty_nrc,
            },
            lines,
            summary: MonetarySummary {
                taxed: self.taxed,
                exempt: self.exempt,
                not_subject: self.not_subject,
                tax: self.tax,
                total: self.total,
            },
            original_document_id: self.original_document_id,
            replacement_document_id: self.replacement_document_id,
            signed_payload: self.signed_payload,
            receipt: receipt(
                self.reception_stamp,
                self.processed_at,
                self.authority_observations,
            ),
            rejection_reasons: self.rejection_reasons,
            observations: self.observations,
            version: self.version,
            created_utc: self.created_utc,
            updated_utc: self.updated_utc,
        })
    }
}

impl TryFrom<LineRow> for LineItem {
    type Error = RepositoryError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let tax_treatment = TaxTreatment::parse(&row.tax_treatment).ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "line {} has unknown tax treatment '{}'",
                row.line_id, row.tax_treatment
            ))
        })?;

        Ok(LineItem {
            line_id: row.line_id,
            line_number: row.line_number,
            description: row.description,
            quantity: row.quantity,
            unit_price: row.unit_price,
            tax_treatment,
            original_line_id: row.original_line_id,
            motive: row.motive,
        })
    }
}

impl TryFrom<InvalidationRow> for InvalidationEvent {
    type Error = RepositoryError;

    fn try_from(row: InvalidationRow) -> Result<Self, Self::Error> {
        let reason = u8::try_from(row.reason_code)
            .ok()
            .and_then(InvalidationReason::from_code)
            .ok_or_else(|| {
                RepositoryError::Corrupt(format!(
                    "invalidation {} has unknown reason {}",
                    row.invalidation_id, row.reason_code
                ))
            })?;
        let status = InvalidationStatus::parse(&row.status).ok_or_else(|| {
            RepositoryError::Corrupt(format!(
                "invalidation {} has unknown status '{}'",
                row.invalidation_id, row.status
            ))
        })?;

        Ok(InvalidationEvent {
            id: row.invalidation_id,
            generation_code: row.generation_code,
            target_document_id: row.target_document_id,
            reason,
            motive: row.motive,
            replacement_document_id: row.replacement_document_id,
            responsible: Party {
                name: row.responsible_name,
                id_document_type: row.responsible_doc_type,
                id_document_number: row.responsible_doc_number,
            },
            requester: Party {
                name: row.requester_name,
                id_document_type: row.requester_doc_type,
                id_document_number: row.requester_doc_number,
            },
            status,
            signed_payload: row.signed_payload,
            receipt: receipt(row.reception_stamp, row.processed_at, row.authority_observations),
            rejection_reasons: row.rejection_reasons,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

/// Attach lines to document rows, preserving row order.
async fn hydrate(
    conn: &mut PgConnection,
    rows: Vec<DocumentRow>,
) -> Result<Vec<FiscalDocument>, RepositoryError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows.iter().map(|r| r.document_id).collect();
    let line_rows = sqlx::query_as::<_, LineRow>(
        r#"
        SELECT line_id, document_id, line_number, description, quantity, unit_price,
            tax_treatment, original_line_id, motive
        FROM document_lines
        WHERE document_id = ANY($1)
        ORDER BY document_id, line_number
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut lines: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
    for row in line_rows {
        lines.entry(row.document_id).or_default().push(LineItem::try_from(row)?);
    }

    rows.into_iter()
        .map(|row| {
            let document_lines = lines.remove(&row.document_id).unwrap_or_default();
            row.into_document(document_lines)
        })
        .collect()
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "dte-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn upsert_invalidation(
        conn: &mut PgConnection,
        event: &InvalidationEvent,
    ) -> Result<(), RepositoryError> {
        let (reception_stamp, processed_at, observations) = match &event.receipt {
            Some(r) => (
                Some(r.reception_stamp.clone()),
                Some(r.processed_at),
                r.observations.clone(),
            ),
            None => (None, None, Vec::new()),
        };

        sqlx::query(
            r#"
            INSERT INTO invalidation_events (
                invalidation_id, generation_code, target_document_id, reason_code, motive,
                replacement_document_id, responsible_name, responsible_doc_type,
                responsible_doc_number, requester_name, requester_doc_type, requester_doc_number,
                status, signed_payload, reception_stamp, processed_at, authority_observations,
                rejection_reasons, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (invalidation_id) DO UPDATE SET
                status = EXCLUDED.status,
                signed_payload = EXCLUDED.signed_payload,
                reception_stamp = EXCLUDED.reception_stamp,
                processed_at = EXCLUDED.processed_at,
                authority_observations = EXCLUDED.authority_observations,
                rejection_reasons = EXCLUDED.rejection_reasons,
                updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(event.id)
        .bind(event.generation_code)
        .bind(event.target_document_id)
        .bind(i16::from(event.reason.code()))
        .bind(&event.motive)
        .bind(event.replacement_document_id)
        .bind(&event.responsible.name)
        .bind(&event.responsible.id_document_type)
        .bind(&event.responsible.id_document_number)
        .bind(&event.requester.name)
        .bind(&event.requester.id_document_type)
        .bind(&event.requester.id_document_number)
        .bind(event.status.as_str())
        .bind(&event.signed_payload)
        .bind(reception_stamp)
        .bind(processed_at)
        .bind(observations)
        .bind(&event.rejection_reasons)
        .bind(event.created_utc)
        .bind(event.updated_utc)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                RepositoryError::Conflict {
                    entity: "invalidation",
                    id: event.target_document_id.to_string(),
                }
            }
            other => other.into(),
        })?;

        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for Database {
    #[instrument(skip(self), fields(document_id = %id))]
    async fn get(&self, id: Uuid) -> Result<Option<FiscalDocument>, RepositoryError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_document"])
            .start_timer();

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM fiscal_documents WHERE document_id = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
        let document = hydrate(&mut conn, rows).await?.into_iter().next();

        timer.observe_duration();
        Ok(document)
    }

    #[instrument(skip(self), fields(generation_code = %generation_code))]
    async fn get_by_generation_code(
        &self,
        generation_code: Uuid,
    ) -> Result<Option<FiscalDocument>, RepositoryError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_document_by_generation_code"])
            .start_timer();

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM fiscal_documents WHERE generation_code = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(generation_code)
        .fetch_all(&mut *conn)
        .await?;
        let document = hydrate(&mut conn, rows).await?.into_iter().next();

        timer.observe_duration();
        Ok(document)
    }

    #[instrument(skip(self, filter))]
    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<FiscalDocument>, RepositoryError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_documents"])
            .start_timer();

        let types: Vec<String> = filter
            .document_types
            .iter()
            .map(|t| t.code().to_string())
            .collect();
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        // Documents and their lines come from one snapshot.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            SELECT {}
            FROM fiscal_documents
            WHERE (cardinality($1::varchar[]) = 0 OR document_type = ANY($1))
              AND (cardinality($2::varchar[]) = 0 OR status = ANY($2))
              AND ($3::timestamptz IS NULL OR issued_at >= $3)
              AND ($4::timestamptz IS NULL OR issued_at < $4)
              AND ($5::uuid IS NULL OR branch_id = $5)
            ORDER BY issued_at, generation_code
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(&types)
        .bind(&statuses)
        .bind(filter.issued_from)
        .bind(filter.issued_until)
        .bind(filter.branch_id)
        .fetch_all(&mut *tx)
        .await?;

        let documents = hydrate(&mut tx, rows).await?;
        tx.commit().await?;

        timer.observe_duration();
        Ok(documents)
    }

    #[instrument(skip(self), fields(original_id = %original_id))]
    async fn list_notes_for(
        &self,
        original_id: Uuid,
    ) -> Result<Vec<FiscalDocument>, RepositoryError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_notes_for"])
            .start_timer();

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            SELECT {}
            FROM fiscal_documents
            WHERE original_document_id = $1 AND document_type IN ('05', '06')
            ORDER BY created_utc
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(original_id)
        .fetch_all(&mut *conn)
        .await?;
        let notes = hydrate(&mut conn, rows).await?;

        timer.observe_duration();
        Ok(notes)
    }

    #[instrument(skip(self))]
    async fn allocate_control_sequence(
        &self,
        document_type: DocumentType,
        establishment_code: &str,
    ) -> Result<i64, RepositoryError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["allocate_control_sequence"])
            .start_timer();

        let next = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO control_sequences (document_type, establishment_code, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (document_type, establishment_code)
            DO UPDATE SET last_value = control_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(document_type.code())
        .bind(establishment_code)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(next)
    }

    #[instrument(skip(self, document), fields(document_id = %document.id))]
    async fn insert(&self, document: &FiscalDocument) -> Result<(), RepositoryError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_document"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO fiscal_documents (
                document_id, generation_code, document_type, control_number, status, branch_id,
                establishment_code, issued_at, currency, counterparty_tax_id, counterparty_name,
                counterparty_id_type, counterparty_nrc, taxed, exempt, not_subject, tax, total,
                original_document_id, observations, version, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(document.id)
        .bind(document.generation_code)
        .bind(document.document_type.code())
        .bind(&document.control_number)
        .bind(document.status.as_str())
        .bind(document.branch_id)
        .bind(&document.establishment_code)
        .bind(document.issued_at)
        .bind(&document.currency)
        .bind(&document.counterparty.tax_id)
        .bind(&document.counterparty.name)
        .bind(&document.counterparty.id_document_type)
        .bind(&document.counterparty.nrc)
        .bind(document.summary.taxed)
        .bind(document.summary.exempt)
        .bind(document.summary.not_subject)
        .bind(document.summary.tax)
        .bind(document.summary.total)
        .bind(document.original_document_id)
        .bind(&document.observations)
        .bind(document.version)
        .bind(document.created_utc)
        .bind(document.updated_utc)
        .execute(&mut *tx)
        .await?;

        for line in &document.lines {
            sqlx::query(
                r#"
                INSERT INTO document_lines (
                    line_id, document_id, line_number, description, quantity, unit_price,
                    tax_treatment, original_line_id, motive
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(line.line_id)
            .bind(document.id)
            .bind(line.line_number)
            .bind(&line.description)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.tax_treatment.as_str())
            .bind(line.original_line_id)
            .bind(&line.motive)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        timer.observe_duration();

        info!(generation_code = %document.generation_code, "Document inserted");
        Ok(())
    }

    /// Lines are immutable after insert; only header state is written here.
    #[instrument(
        skip(self, document, invalidation),
        fields(document_id = %document.id, version = document.version)
    )]
    async fn save(
        &self,
        document: &FiscalDocument,
        invalidation: Option<&InvalidationEvent>,
    ) -> Result<FiscalDocument, RepositoryError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_document"])
            .start_timer();

        let (reception_stamp, processed_at, observations) = match &document.receipt {
            Some(r) => (
                Some(r.reception_stamp.clone()),
                Some(r.processed_at),
                r.observations.clone(),
            ),
            None => (None, None, Vec::new()),
        };

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE fiscal_documents SET
                status = $3,
                replacement_document_id = $4,
                signed_payload = $5,
                reception_stamp = $6,
                processed_at = $7,
                authority_observations = $8,
                rejection_reasons = $9,
                updated_utc = $10,
                version = version + 1
            WHERE document_id = $1 AND version = $2
            "#,
        )
        .bind(document.id)
        .bind(document.version)
        .bind(document.status.as_str())
        .bind(document.replacement_document_id)
        .bind(&document.signed_payload)
        .bind(reception_stamp)
        .bind(processed_at)
        .bind(observations)
        .bind(&document.rejection_reasons)
        .bind(document.updated_utc)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM fiscal_documents WHERE document_id = $1",
            )
            .bind(document.id)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await.ok();

            return Err(if exists > 0 {
                RepositoryError::Conflict {
                    entity: "document",
                    id: document.id.to_string(),
                }
            } else {
                RepositoryError::NotFound(format!("document {}", document.id))
            });
        }

        if let Some(event) = invalidation {
            Self::upsert_invalidation(&mut tx, event).await?;
        }

        tx.commit().await?;
        timer.observe_duration();

        let mut stored = document.clone();
        stored.version += 1;
        Ok(stored)
    }

    #[instrument(skip(self), fields(invalidation_id = %id))]
    async fn get_invalidation(
        &self,
        id: Uuid,
    ) -> Result<Option<InvalidationEvent>, RepositoryError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invalidation"])
            .start_timer();

        let row = sqlx::query_as::<_, InvalidationRow>(&format!(
            "SELECT {} FROM invalidation_events WHERE invalidation_id = $1",
            INVALIDATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(InvalidationEvent::try_from).transpose()
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn list_invalidations(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<InvalidationEvent>, RepositoryError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invalidations"])
            .start_timer();

        let rows = sqlx::query_as::<_, InvalidationRow>(&format!(
            "SELECT {} FROM invalidation_events WHERE target_document_id = $1 ORDER BY created_utc",
            INVALIDATION_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        rows.into_iter().map(InvalidationEvent::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}
