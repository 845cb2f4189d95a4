//! Configuration module for dte-service.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct DteConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageBackend,
    pub database: Option<DatabaseConfig>,
    pub authority: AuthorityConfig,
    pub tax: TaxConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(StorageBackend::Postgres),
            "memory" | "in-memory" => Some(StorageBackend::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub api_url: String,
    pub signer_url: String,
    pub api_token: String,
    /// `00` test, `01` production.
    pub environment: String,
    pub emitter_tax_id: String,
    pub signer_password: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TaxConfig {
    pub vat_rate: Decimal,
    pub utc_offset_minutes: i32,
    pub holidays: Vec<NaiveDate>,
    pub default_establishment: String,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            vat_rate: Decimal::new(13, 2),
            utc_offset_minutes: -360,
            holidays: Vec::new(),
            default_establishment: "M001P001".to_string(),
        }
    }
}

impl AuthorityConfig {
    /// Settings pointing at nothing; only useful with the mock gateway.
    pub fn local() -> Self {
        Self {
            api_url: "http://localhost:8113".to_string(),
            signer_url: "http://localhost:8113".to_string(),
            api_token: String::new(),
            environment: "00".to_string(),
            emitter_tax_id: String::new(),
            signer_password: String::new(),
            timeout_secs: 8,
        }
    }
}

impl DteConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let storage = match env::var("STORAGE_BACKEND") {
            Ok(value) => StorageBackend::parse(&value).ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "STORAGE_BACKEND must be 'postgres' or 'memory', got '{}'",
                    value
                ))
            })?,
            Err(_) => StorageBackend::Postgres,
        };

        let database = match storage {
            StorageBackend::Postgres => Some(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            }),
            StorageBackend::Memory => None,
        };

        let defaults = TaxConfig::default();
        let vat_rate = match env::var("VAT_RATE") {
            Ok(value) => Decimal::from_str(&value).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid VAT_RATE '{}': {}", value, e))
            })?,
            Err(_) => defaults.vat_rate,
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "dte-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            storage,
            database,
            authority: AuthorityConfig {
                api_url: env::var("AUTHORITY_API_URL")
                    .unwrap_or_else(|_| "https://apitest.dtes.mh.gob.sv".to_string()),
                signer_url: env::var("AUTHORITY_SIGNER_URL")
                    .unwrap_or_else(|_| "http://dte-signer:8113".to_string()),
                api_token: env::var("AUTHORITY_API_TOKEN").unwrap_or_default(),
                environment: env::var("AUTHORITY_ENVIRONMENT").unwrap_or_else(|_| "00".to_string()),
                emitter_tax_id: env::var("AUTHORITY_EMITTER_NIT").unwrap_or_default(),
                signer_password: env::var("AUTHORITY_SIGNER_PASSWORD").unwrap_or_default(),
                timeout_secs: env::var("AUTHORITY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8),
            },
            tax: TaxConfig {
                vat_rate,
                utc_offset_minutes: env::var("FISCAL_UTC_OFFSET_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.utc_offset_minutes),
                holidays: match env::var("HOLIDAYS") {
                    Ok(value) => parse_holidays(&value)?,
                    Err(_) => Vec::new(),
                },
                default_establishment: env::var("DEFAULT_ESTABLISHMENT")
                    .unwrap_or(defaults.default_establishment),
            },
        })
    }
}

/// Comma-separated `YYYY-MM-DD` list.
pub fn parse_holidays(value: &str) -> Result<Vec<NaiveDate>, AppError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid holiday '{}': {}", s, e))
            })
        })
        .collect()
}
