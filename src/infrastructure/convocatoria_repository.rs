//! Repository for the mirrored `convocatorias` table
//!
//! The upsert is a single atomic statement keyed by the natural key. It
//! reports insert-vs-update without a separate existence check: both
//! bookkeeping timestamps are bound from one value on the insert arm while
//! the update arm only bumps `updated_at`, so the returned pair is equal
//! exactly when the insert arm ran.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::domain::{Convocatoria, DatabaseStatistics};

#[derive(Clone)]
pub struct ConvocatoriaRepository {
    pool: Arc<SqlitePool>,
}

impl ConvocatoriaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Insert or update one record, returning `true` when a new row was
    /// created.
    pub async fn upsert(&self, record: &Convocatoria) -> Result<bool> {
        let now = Utc::now();

        let row = sqlx::query(
            r#"
            INSERT INTO convocatorias (
                codigo_bdns, titulo, titulo_cooficial, desc_organo, codigo_organo,
                fecha_registro, fecha_modificacion, inicio_solicitud, fin_solicitud,
                abierto, regiones, financiacion, finalidad, instrumentos, sectores,
                tipos_beneficiario, importe_total, permalink_convocatoria,
                url_bases_reguladoras, created_at, updated_at, last_synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(codigo_bdns) DO UPDATE SET
                titulo = excluded.titulo,
                titulo_cooficial = excluded.titulo_cooficial,
                desc_organo = excluded.desc_organo,
                codigo_organo = excluded.codigo_organo,
                fecha_registro = excluded.fecha_registro,
                fecha_modificacion = excluded.fecha_modificacion,
                inicio_solicitud = excluded.inicio_solicitud,
                fin_solicitud = excluded.fin_solicitud,
                abierto = excluded.abierto,
                regiones = excluded.regiones,
                financiacion = excluded.financiacion,
                finalidad = excluded.finalidad,
                instrumentos = excluded.instrumentos,
                sectores = excluded.sectores,
                tipos_beneficiario = excluded.tipos_beneficiario,
                importe_total = excluded.importe_total,
                permalink_convocatoria = excluded.permalink_convocatoria,
                url_bases_reguladoras = excluded.url_bases_reguladoras,
                updated_at = excluded.updated_at,
                last_synced_at = excluded.last_synced_at
            RETURNING created_at, updated_at
            "#,
        )
        .bind(&record.codigo_bdns)
        .bind(&record.titulo)
        .bind(&record.titulo_cooficial)
        .bind(&record.desc_organo)
        .bind(&record.codigo_organo)
        .bind(record.fecha_registro)
        .bind(record.fecha_modificacion)
        .bind(record.inicio_solicitud)
        .bind(record.fin_solicitud)
        .bind(record.abierto)
        .bind(blob_to_text(&record.regiones)?)
        .bind(blob_to_text(&record.financiacion)?)
        .bind(blob_to_text(&record.finalidad)?)
        .bind(blob_to_text(&record.instrumentos)?)
        .bind(blob_to_text(&record.sectores)?)
        .bind(blob_to_text(&record.tipos_beneficiario)?)
        .bind(record.importe_total)
        .bind(&record.permalink_convocatoria)
        .bind(&record.url_bases_reguladoras)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .with_context(|| format!("upsert failed for codigo_bdns {}", record.codigo_bdns))?;

        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");
        Ok(created_at == updated_at)
    }

    pub async fn get_by_codigo(&self, codigo_bdns: &str) -> Result<Option<Convocatoria>> {
        let row = sqlx::query(
            r#"
            SELECT codigo_bdns, titulo, titulo_cooficial, desc_organo, codigo_organo,
                   fecha_registro, fecha_modificacion, inicio_solicitud, fin_solicitud,
                   abierto, regiones, financiacion, finalidad, instrumentos, sectores,
                   tipos_beneficiario, importe_total, permalink_convocatoria,
                   url_bases_reguladoras
            FROM convocatorias WHERE codigo_bdns = ?
            "#,
        )
        .bind(codigo_bdns)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Convocatoria {
                codigo_bdns: row.get("codigo_bdns"),
                titulo: row.get("titulo"),
                titulo_cooficial: row.get("titulo_cooficial"),
                desc_organo: row.get("desc_organo"),
                codigo_organo: row.get("codigo_organo"),
                fecha_registro: row.get::<Option<NaiveDate>, _>("fecha_registro"),
                fecha_modificacion: row.get::<Option<NaiveDate>, _>("fecha_modificacion"),
                inicio_solicitud: row.get::<Option<NaiveDate>, _>("inicio_solicitud"),
                fin_solicitud: row.get::<Option<NaiveDate>, _>("fin_solicitud"),
                abierto: row.get("abierto"),
                regiones: text_to_blob(row.get("regiones"))?,
                financiacion: text_to_blob(row.get("financiacion"))?,
                finalidad: text_to_blob(row.get("finalidad"))?,
                instrumentos: text_to_blob(row.get("instrumentos"))?,
                sectores: text_to_blob(row.get("sectores"))?,
                tipos_beneficiario: text_to_blob(row.get("tipos_beneficiario"))?,
                importe_total: row.get("importe_total"),
                permalink_convocatoria: row.get("permalink_convocatoria"),
                url_bases_reguladoras: row.get("url_bases_reguladoras"),
            })),
            None => Ok(None),
        }
    }

    /// Aggregates for the health/status view.
    pub async fn get_statistics(&self) -> Result<DatabaseStatistics> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN abierto THEN 1 ELSE 0 END), 0) AS abiertas,
                   MAX(last_synced_at) AS last_synced_at
            FROM convocatorias
            "#,
        )
        .fetch_one(&*self.pool)
        .await?;

        Ok(DatabaseStatistics {
            total_convocatorias: row.get("total"),
            convocatorias_abiertas: row.get("abiertas"),
            last_synced_at: row.get::<Option<DateTime<Utc>>, _>("last_synced_at"),
        })
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM convocatorias")
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

fn blob_to_text(blob: &Option<serde_json::Value>) -> Result<Option<String>> {
    blob.as_ref()
        .map(|v| serde_json::to_string(v).context("failed to serialize JSON blob"))
        .transpose()
}

fn text_to_blob(text: Option<String>) -> Result<Option<serde_json::Value>> {
    text.map(|s| serde_json::from_str(&s).context("stored JSON blob is invalid"))
        .transpose()
}
