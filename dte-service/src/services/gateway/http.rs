use super::{
    AuthorityOutcome, GatewayError, SignedPayload, Submission, SubmissionKind,
    TaxAuthorityGateway,
};
use crate::config::AuthorityConfig;
use crate::models::DocumentType;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use service_core::retry::{retry_call, RetryConfig};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const SIGN_PATH: &str = "/firmardocumento/";
const RECEPTION_PATH: &str = "/fesv/recepciondte";
const INVALIDATION_PATH: &str = "/fesv/anulardte";
const INVALIDATION_SCHEMA_VERSION: u8 = 2;

/// Gateway to the signer sidecar and the authority reception API.
pub struct HttpTaxAuthorityGateway {
    config: AuthorityConfig,
    client: Client,
    retry: RetryConfig,
    offset: FixedOffset,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    nit: &'a str,
    activo: bool,
    password_pri: &'a str,
    dte_json: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    status: String,
    body: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceptionRequest<'a> {
    ambiente: &'a str,
    id_envio: String,
    version: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    tipo_dte: Option<&'a str>,
    documento: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    codigo_generacion: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceptionResponse {
    estado: String,
    #[serde(default)]
    sello_recibido: Option<String>,
    #[serde(default)]
    fh_procesamiento: Option<String>,
    #[serde(default)]
    descripcion_msg: Option<String>,
    #[serde(default)]
    observaciones: Vec<String>,
}

/// Schema version the authority expects for each document type.
fn schema_version(document_type: DocumentType) -> u8 {
    match document_type {
        DocumentType::FiscalCreditVoucher | DocumentType::CreditNote | DocumentType::DebitNote => 3,
        DocumentType::Invoice
        | DocumentType::RetentionVoucher
        | DocumentType::ExportInvoice
        | DocumentType::ExcludedSubjectVoucher => 1,
    }
}

impl HttpTaxAuthorityGateway {
    pub fn new(config: AuthorityConfig, offset: FixedOffset) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            config,
            client,
            retry: RetryConfig::default(),
            offset,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn sign_once(&self, payload: &serde_json::Value) -> Result<SignedPayload, GatewayError> {
        let request = SignRequest {
            nit: &self.config.emitter_tax_id,
            activo: true,
            password_pri: &self.config.signer_password,
            dte_json: payload,
        };

        let response = self
            .client
            .post(format!("{}{}", self.config.signer_url.trim_end_matches('/'), SIGN_PATH))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Transport(format!(
                "Signer returned status {}",
                status
            )));
        }

        let body: SignResponse = response.json().await.map_err(|e| {
            GatewayError::Signing(format!("Failed to parse signer response: {}", e))
        })?;

        match (body.status.as_str(), body.body) {
            ("OK", serde_json::Value::String(token)) => Ok(SignedPayload(token)),
            (_, detail) => Err(GatewayError::Signing(detail.to_string())),
        }
    }

    fn processed_at(&self, raw: Option<&str>) -> DateTime<Utc> {
        raw.and_then(|s| NaiveDateTime::parse_from_str(s, "%d/%m/%Y %H:%M:%S").ok())
            .and_then(|local| self.offset.from_local_datetime(&local).single())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }

    fn outcome_from(&self, response: ReceptionResponse) -> AuthorityOutcome {
        match response.estado.as_str() {
            "PROCESADO" => AuthorityOutcome::Accepted {
                reception_stamp: response.sello_recibido.unwrap_or_default(),
                processed_at: self.processed_at(response.fh_procesamiento.as_deref()),
                observations: response.observaciones,
            },
            "RECHAZADO" => {
                let mut reasons: Vec<String> = response.descripcion_msg.into_iter().collect();
                reasons.extend(response.observaciones);
                AuthorityOutcome::Rejected { reasons }
            }
            other => {
                AuthorityOutcome::TransportError(format!("Unexpected authority state '{}'", other))
            }
        }
    }
}

#[async_trait]
impl TaxAuthorityGateway for HttpTaxAuthorityGateway {
    #[instrument(skip(self, payload))]
    async fn sign(&self, payload: &serde_json::Value) -> Result<SignedPayload, GatewayError> {
        retry_call(&self.retry, "sign_document", || self.sign_once(payload)).await
    }

    #[instrument(
        skip(self, submission),
        fields(generation_code = %submission.generation_code, kind = submission.kind.as_str())
    )]
    async fn transmit(&self, submission: &Submission) -> AuthorityOutcome {
        let (path, request) = match submission.kind {
            SubmissionKind::Document => (
                RECEPTION_PATH,
                ReceptionRequest {
                    ambiente: &self.config.environment,
                    id_envio: Uuid::new_v4().to_string(),
                    version: schema_version(submission.document_type),
                    tipo_dte: Some(submission.document_type.code()),
                    documento: &submission.signed_payload,
                    codigo_generacion: Some(submission.generation_code.to_string().to_uppercase()),
                },
            ),
            SubmissionKind::Invalidation => (
                INVALIDATION_PATH,
                ReceptionRequest {
                    ambiente: &self.config.environment,
                    id_envio: Uuid::new_v4().to_string(),
                    version: INVALIDATION_SCHEMA_VERSION,
                    tipo_dte: None,
                    documento: &submission.signed_payload,
                    codigo_generacion: None,
                },
            ),
        };

        let response = match self
            .client
            .post(format!("{}{}", self.config.api_url.trim_end_matches('/'), path))
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Authority unreachable");
                return AuthorityOutcome::TransportError(e.to_string());
            }
        };

        let status = response.status();
        if status.is_server_error() || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Authority returned error status");
            return AuthorityOutcome::TransportError(format!(
                "Authority returned status {}: {}",
                status, body
            ));
        }

        // Rejections come back as 400 with a regular reception body.
        match response.json::<ReceptionResponse>().await {
            Ok(body) => {
                let outcome = self.outcome_from(body);
                info!(outcome = outcome.label(), "Authority responded");
                outcome
            }
            Err(e) => AuthorityOutcome::TransportError(format!(
                "Failed to parse authority response ({}): {}",
                status, e
            )),
        }
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        if self.config.api_token.is_empty() {
            return Err(GatewayError::Configuration(
                "AUTHORITY_API_TOKEN is not configured".to_string(),
            ));
        }
        Ok(())
    }
}
