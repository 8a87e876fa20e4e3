//! Mirrored grant call ("convocatoria") domain model
//!
//! One row per BDNS registry entry. The natural key is the registry's own
//! BDNS code; re-syncing the same code updates the existing row. Nested
//! registry structures whose schema varies upstream (regions, financing
//! breakdown, sectors, ...) are kept as opaque JSON blobs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Convocatoria {
    /// External natural key (`codigo-BDNS`), unique and immutable.
    pub codigo_bdns: String,
    pub titulo: Option<String>,
    pub titulo_cooficial: Option<String>,
    /// Issuing organisation, descriptive name and DIR3 code.
    pub desc_organo: Option<String>,
    pub codigo_organo: Option<String>,
    pub fecha_registro: Option<NaiveDate>,
    pub fecha_modificacion: Option<NaiveDate>,
    /// Application window, both ends optional.
    pub inicio_solicitud: Option<NaiveDate>,
    pub fin_solicitud: Option<NaiveDate>,
    pub abierto: bool,
    pub regiones: Option<serde_json::Value>,
    pub financiacion: Option<serde_json::Value>,
    pub finalidad: Option<serde_json::Value>,
    pub instrumentos: Option<serde_json::Value>,
    pub sectores: Option<serde_json::Value>,
    pub tipos_beneficiario: Option<serde_json::Value>,
    /// Sum over the financing breakdown's amounts; `None` when the registry
    /// sent no breakdown at all.
    pub importe_total: Option<f64>,
    pub permalink_convocatoria: Option<String>,
    pub url_bases_reguladoras: Option<String>,
}

/// Aggregate read model for the health/status view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStatistics {
    pub total_convocatorias: i64,
    pub convocatorias_abiertas: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
}
