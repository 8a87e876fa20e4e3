//! Job-control surface
//!
//! The minimal interface the rest of the application (web layer, scheduler)
//! calls: start a run, read the latest job row for progress display, read
//! cumulative database statistics for the health view. Everything else is
//! the orchestrator's business.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::application::sync_orchestrator::SyncOrchestrator;
use crate::domain::{DatabaseStatistics, SyncJob, SyncMode, SyncReport};
use crate::infrastructure::config::RegistryConfig;
use crate::infrastructure::{ConvocatoriaRepository, PageProvider, SyncJobRepository};

pub struct SyncService {
    orchestrator: SyncOrchestrator,
    records: ConvocatoriaRepository,
    jobs: SyncJobRepository,
}

impl SyncService {
    pub fn new(
        fetcher: Arc<dyn PageProvider>,
        records: ConvocatoriaRepository,
        jobs: SyncJobRepository,
        config: RegistryConfig,
    ) -> Self {
        let orchestrator =
            SyncOrchestrator::new(fetcher, records.clone(), jobs.clone(), config);
        Self {
            orchestrator,
            records,
            jobs,
        }
    }

    /// Run a sync in the given mode and wait for it to finish.
    pub async fn start_sync(&self, mode: SyncMode) -> Result<SyncReport> {
        info!(%mode, "sync requested");
        self.orchestrator.run(mode).await
    }

    /// Most recent sync run (running or finished), for progress display.
    pub async fn latest_job(&self) -> Result<Option<SyncJob>> {
        self.jobs.get_latest_job().await
    }

    /// Cumulative mirror statistics for the health/status view.
    pub async fn statistics(&self) -> Result<DatabaseStatistics> {
        self.records.get_statistics().await
    }
}
