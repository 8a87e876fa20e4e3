//! Sync-job model and run-scoped progress state
//!
//! A `SyncJob` is one persisted row per run in the `sync_status` table:
//! created as `Running`, finalized exactly once to `Completed` or `Failed`.
//! `SyncRunState` holds the in-flight counters and error list and is owned
//! by the orchestrator invocation, so concurrent runs never share counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, Type};

/// Which date window a run covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncMode {
    /// Window since the persisted `last_full_sync` watermark.
    Incremental,
    /// Fixed recent window (2023 onwards).
    Full,
    /// Entire registry history (2008 onwards).
    CompleteHistorical,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Incremental => "incremental",
            SyncMode::Full => "full",
            SyncMode::CompleteHistorical => "complete_historical",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Type<sqlx::Sqlite> for SyncMode {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for SyncMode {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for SyncMode {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        match s.as_str() {
            "incremental" => Ok(SyncMode::Incremental),
            "full" => Ok(SyncMode::Full),
            "complete_historical" => Ok(SyncMode::CompleteHistorical),
            _ => Err(format!("Invalid SyncMode: {s}").into()),
        }
    }
}

/// Lifecycle status of a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

impl Type<sqlx::Sqlite> for SyncStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for SyncStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for SyncStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        match s.as_str() {
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(format!("Invalid SyncStatus: {s}").into()),
        }
    }
}

/// One persisted row of the `sync_status` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncJob {
    pub id: String,
    pub sync_type: SyncMode,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_pages: i64,
    pub processed_pages: i64,
    /// Estimate from the page probe (`total_pages * page_size`).
    pub total_records: i64,
    pub processed_records: i64,
    pub new_records: i64,
    pub updated_records: i64,
    pub error_message: Option<String>,
    /// JSON snapshot of the run parameters (page size, concurrency, window).
    pub params: String,
}

/// One entry of the run's accumulated error list, tagged with where it
/// happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub page: u32,
    /// Natural key of the failing record; `None` for page-level failures.
    pub codigo_bdns: Option<String>,
    pub message: String,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.codigo_bdns {
            Some(codigo) => write!(f, "page {} record {}: {}", self.page, codigo, self.message),
            None => write!(f, "page {}: {}", self.page, self.message),
        }
    }
}

/// Cumulative counters for one run. Pages complete out of order, so these
/// are sums, never positional markers.
#[derive(Debug, Default, Clone)]
pub struct SyncRunState {
    pub processed_pages: u32,
    pub processed_records: u64,
    pub new_records: u64,
    pub updated_records: u64,
    pub errors: Vec<SyncError>,
}

impl SyncRunState {
    pub fn record_upsert(&mut self, inserted: bool) {
        self.processed_records += 1;
        if inserted {
            self.new_records += 1;
        } else {
            self.updated_records += 1;
        }
    }

    pub fn record_error(&mut self, page: u32, codigo_bdns: Option<String>, message: String) {
        self.errors.push(SyncError {
            page,
            codigo_bdns,
            message,
        });
    }
}

/// Final outcome handed back to the job-control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub job_id: String,
    pub sync_type: SyncMode,
    pub total_pages: u32,
    pub processed_pages: u32,
    pub processed_records: u64,
    pub new_records: u64,
    pub updated_records: u64,
    pub errors: Vec<SyncError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_splits_inserts_and_updates() {
        let mut state = SyncRunState::default();
        state.record_upsert(true);
        state.record_upsert(false);
        state.record_upsert(false);

        assert_eq!(state.processed_records, 3);
        assert_eq!(state.new_records, 1);
        assert_eq!(state.updated_records, 2);
    }

    #[test]
    fn sync_error_display_includes_context() {
        let record = SyncError {
            page: 4,
            codigo_bdns: Some("123456".into()),
            message: "boom".into(),
        };
        assert_eq!(record.to_string(), "page 4 record 123456: boom");

        let page = SyncError {
            page: 7,
            codigo_bdns: None,
            message: "timeout".into(),
        };
        assert_eq!(page.to_string(), "page 7: timeout");
    }
}
