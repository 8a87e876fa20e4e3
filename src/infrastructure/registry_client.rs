//! HTTP client for the BDNS registry listing endpoint
//!
//! Wraps `GET {base}/listadoconvocatoria` with per-call timeouts and decodes
//! the registry's envelope (a one-element array wrapping the pagination
//! metadata plus a map of records). All knowledge of the hyphenated,
//! inconsistently-typed wire shape lives here: the orchestrator only ever
//! sees `PageEnvelope` and typed `Convocatoria` values.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::domain::Convocatoria;
use crate::infrastructure::config::RegistryConfig;
use crate::infrastructure::normalizer::{normalize_date, sum_financing};

/// Inclusive date window a sync run covers, as the registry expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub desde: NaiveDate,
    pub hasta: NaiveDate,
}

impl DateWindow {
    /// The registry's query parameters want `DD/MM/YYYY`.
    pub fn desde_param(&self) -> String {
        self.desde.format("%d/%m/%Y").to_string()
    }

    pub fn hasta_param(&self) -> String {
        self.hasta.format("%d/%m/%Y").to_string()
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.desde_param(), self.hasta_param())
    }
}

/// Page-level fetch failures. A timeout is a page failure, not a retry
/// trigger; retries are left to the next scheduled run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("registry returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed response envelope: {0}")]
    Envelope(String),
}

/// Decoded listing page: pagination metadata plus the raw records.
#[derive(Debug, Clone)]
pub struct PageEnvelope {
    pub total_pages: u32,
    pub page: u32,
    pub page_size: u32,
    /// Raw records, still in wire shape. The registry keys them by an
    /// opaque id; callers only need the values.
    pub records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "total-pages")]
    total_pages: u32,
    #[serde(rename = "page")]
    page: u32,
    #[serde(rename = "page-size")]
    page_size: u32,
    /// Absent or empty on zero-yield pages; treated as an empty page by the
    /// caller, not a decode failure.
    #[serde(rename = "convocatorias", default)]
    convocatorias: Option<HashMap<String, Value>>,
}

/// Seam between the orchestrator and the network, mockable in tests.
#[async_trait]
pub trait PageProvider: Send + Sync {
    /// Fetch one zero-based page of the listing for the given window.
    async fn fetch_page(
        &self,
        page: u32,
        page_size: u32,
        window: DateWindow,
    ) -> Result<PageEnvelope, FetchError>;
}

/// Rate-limited registry client.
pub struct RegistryClient {
    client: Client,
    base_url: String,
    bulk_timeout: Duration,
    probe_timeout: Duration,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bulk_timeout: Duration::from_secs(config.fetch_timeout_seconds),
            probe_timeout: Duration::from_secs(config.probe_timeout_seconds),
        })
    }

    async fn fetch_with_timeout(
        &self,
        page: u32,
        page_size: u32,
        window: DateWindow,
        timeout: Duration,
    ) -> Result<PageEnvelope, FetchError> {
        let url = format!("{}/listadoconvocatoria", self.base_url);
        debug!(page, page_size, %window, "fetching registry page");

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .query(&listing_query(page, page_size, window))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body: Value = response.json().await?;
        decode_envelope(body)
    }
}

#[async_trait]
impl PageProvider for RegistryClient {
    async fn fetch_page(
        &self,
        page: u32,
        page_size: u32,
        window: DateWindow,
    ) -> Result<PageEnvelope, FetchError> {
        // The probe (page-size 1) only reads pagination metadata, so it
        // gets the short timeout; bulk pages get the long one.
        let timeout = if page_size <= 1 {
            self.probe_timeout
        } else {
            self.bulk_timeout
        };
        self.fetch_with_timeout(page, page_size, window, timeout).await
    }
}

/// Query parameters for the listing endpoint. The registry hyphenates
/// every multi-word parameter, `page-size` included.
fn listing_query(page: u32, page_size: u32, window: DateWindow) -> [(&'static str, String); 4] {
    [
        ("page", page.to_string()),
        ("page-size", page_size.to_string()),
        ("fecha-desde", window.desde_param()),
        ("fecha-hasta", window.hasta_param()),
    ]
}

/// Parse the one-element-array envelope. All pagination parsing, probe
/// included, goes through here; an upstream shape change breaks in exactly
/// one place.
fn decode_envelope(body: Value) -> Result<PageEnvelope, FetchError> {
    let Value::Array(mut outer) = body else {
        return Err(FetchError::Envelope("expected a top-level array".into()));
    };
    if outer.is_empty() {
        return Err(FetchError::Envelope("empty top-level array".into()));
    }

    let wire: WireEnvelope = serde_json::from_value(outer.swap_remove(0))
        .map_err(|e| FetchError::Envelope(e.to_string()))?;

    let records = wire
        .convocatorias
        .map(|map| map.into_values().collect())
        .unwrap_or_default();

    Ok(PageEnvelope {
        total_pages: wire.total_pages,
        page: wire.page,
        page_size: wire.page_size,
        records,
    })
}

/// Translate one raw wire record into the typed entity.
///
/// This is the only place that touches the registry's hyphenated field
/// names. Every field goes through the normalizer; only a missing natural
/// key makes the record unusable.
pub fn convocatoria_from_raw(raw: &Value) -> Result<Convocatoria> {
    let codigo_bdns = natural_key(raw).ok_or_else(|| anyhow!("record has no codigo-BDNS"))?;

    let financiacion = raw.get("financiacion").filter(|v| !v.is_null()).cloned();
    let importe_total = sum_financing(financiacion.as_ref());

    Ok(Convocatoria {
        codigo_bdns,
        titulo: string_field(raw, "titulo"),
        titulo_cooficial: string_field(raw, "titulo-cooficial"),
        desc_organo: string_field(raw, "desc-organo"),
        codigo_organo: string_field(raw, "dir3-organo"),
        fecha_registro: date_field(raw, "fecha-registro"),
        fecha_modificacion: date_field(raw, "fecha-mod"),
        inicio_solicitud: date_field(raw, "inicio-solicitud"),
        fin_solicitud: date_field(raw, "fin-solicitud"),
        abierto: raw.get("abierto").and_then(Value::as_bool).unwrap_or(false),
        regiones: blob_field(raw, "region"),
        financiacion,
        finalidad: blob_field(raw, "finalidad"),
        instrumentos: blob_field(raw, "instrumento"),
        sectores: blob_field(raw, "sector"),
        tipos_beneficiario: blob_field(raw, "tipo-beneficiario"),
        importe_total,
        permalink_convocatoria: string_field(raw, "permalink-convocatoria"),
        url_bases_reguladoras: string_field(raw, "URLespanol"),
    })
}

/// Extract the record's natural key, if present. Also used by the
/// orchestrator to tag error-list entries for records that fail to decode.
pub fn natural_key(raw: &Value) -> Option<String> {
    raw.get("codigo-BDNS")
        .and_then(scalar_as_string)
        .filter(|s| !s.is_empty())
}

fn string_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(scalar_as_string)
        .filter(|s| !s.is_empty())
}

/// The registry sometimes ships numeric fields (the BDNS code included) as
/// numbers instead of strings.
fn scalar_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn date_field(raw: &Value, key: &str) -> Option<NaiveDate> {
    raw.get(key)
        .and_then(Value::as_str)
        .and_then(normalize_date)
}

fn blob_field(raw: &Value, key: &str) -> Option<Value> {
    raw.get(key).filter(|v| !v.is_null()).cloned()
}

/// Counting semaphore bounding concurrent page fetches.
///
/// Acquire/release discipline: `acquire` hands back an owned permit that
/// releases on drop. Tokio's semaphore is FIFO-fair, so queued callers are
/// released in arrival order. Owned per run, never a process-wide global.
#[derive(Clone)]
pub struct FetchLimiter {
    permits: Arc<Semaphore>,
}

impl FetchLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .context("fetch limiter closed")
    }
}
