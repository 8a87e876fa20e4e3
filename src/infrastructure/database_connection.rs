//! SQLite connection pool and schema migration

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // Create the database file (and its directory) if missing; sqlx
        // will not create intermediate directories itself.
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_convocatorias_sql = r#"
            CREATE TABLE IF NOT EXISTS convocatorias (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                codigo_bdns TEXT NOT NULL UNIQUE,
                titulo TEXT,
                titulo_cooficial TEXT,
                desc_organo TEXT,
                codigo_organo TEXT,
                fecha_registro TEXT,
                fecha_modificacion TEXT,
                inicio_solicitud TEXT,
                fin_solicitud TEXT,
                abierto BOOLEAN NOT NULL DEFAULT 0,
                regiones TEXT,
                financiacion TEXT,
                finalidad TEXT,
                instrumentos TEXT,
                sectores TEXT,
                tipos_beneficiario TEXT,
                importe_total REAL,
                permalink_convocatoria TEXT,
                url_bases_reguladoras TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                last_synced_at DATETIME NOT NULL
            )
        "#;

        let create_sync_status_sql = r#"
            CREATE TABLE IF NOT EXISTS sync_status (
                id TEXT PRIMARY KEY,
                sync_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                total_pages INTEGER NOT NULL DEFAULT 0,
                processed_pages INTEGER NOT NULL DEFAULT 0,
                total_records INTEGER NOT NULL DEFAULT 0,
                processed_records INTEGER NOT NULL DEFAULT 0,
                new_records INTEGER NOT NULL DEFAULT 0,
                updated_records INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                params TEXT NOT NULL DEFAULT '{}'
            )
        "#;

        let create_search_config_sql = r#"
            CREATE TABLE IF NOT EXISTS search_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
        "#;

        let create_indexes_sql = [
            "CREATE INDEX IF NOT EXISTS idx_convocatorias_abierto ON convocatorias (abierto)",
            "CREATE INDEX IF NOT EXISTS idx_convocatorias_fecha_registro ON convocatorias (fecha_registro)",
            "CREATE INDEX IF NOT EXISTS idx_sync_status_started_at ON sync_status (started_at)",
        ];

        sqlx::query(create_convocatorias_sql).execute(&self.pool).await?;
        sqlx::query(create_sync_status_sql).execute(&self.pool).await?;
        sqlx::query(create_search_config_sql).execute(&self.pool).await?;
        for sql in create_indexes_sql {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}
