//! Sync orchestrator
//!
//! Drives one run end to end: resolves the date window for the requested
//! mode, probes the registry for the page count, fans page fetches out
//! under the concurrency limiter with inter-batch pacing, pushes every
//! record through the decode boundary and the upsert writer, and keeps the
//! persisted job row's counters current.
//!
//! Fault isolation: a bad record never stops its page, a failed page never
//! stops the run. Only hard failures (the probe, job-row writes) abort the
//! run, mark the job failed and re-raise to the caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::domain::{SyncMode, SyncReport, SyncRunState};
use crate::infrastructure::config::RegistryConfig;
use crate::infrastructure::registry_client::{
    DateWindow, FetchLimiter, PageProvider, convocatoria_from_raw, natural_key,
};
use crate::infrastructure::{ConvocatoriaRepository, SyncJobRepository};

/// First day the `full` window covers.
const FULL_SYNC_START: (i32, u32, u32) = (2023, 1, 1);
/// Registry founding year; `complete-historical` starts here.
const HISTORICAL_SYNC_START: (i32, u32, u32) = (2008, 1, 1);
/// Progress counters are flushed to the job row every this many pages.
const PROGRESS_FLUSH_PAGES: u32 = 10;
/// How many error-list entries make it into the persisted summary.
const ERROR_SUMMARY_LIMIT: usize = 5;

pub struct SyncOrchestrator {
    fetcher: Arc<dyn PageProvider>,
    records: ConvocatoriaRepository,
    jobs: SyncJobRepository,
    config: RegistryConfig,
}

impl SyncOrchestrator {
    pub fn new(
        fetcher: Arc<dyn PageProvider>,
        records: ConvocatoriaRepository,
        jobs: SyncJobRepository,
        config: RegistryConfig,
    ) -> Self {
        Self {
            fetcher,
            records,
            jobs,
            config,
        }
    }

    /// Run one sync. Returns the report on success; on a hard failure the
    /// job row is marked failed (best effort) and the error re-raised.
    pub async fn run(&self, mode: SyncMode) -> Result<SyncReport> {
        let today = Utc::now().date_naive();
        let watermark = self.jobs.get_last_full_sync().await?;
        let window = resolve_window(mode, watermark, today);

        let params = json!({
            "page_size": self.config.page_size,
            "max_concurrent_fetches": self.config.max_concurrent_fetches,
            "fecha_desde": window.desde_param(),
            "fecha_hasta": window.hasta_param(),
        });
        let job_id = self.jobs.create_job(mode, &params).await?;
        info!(%job_id, %mode, %window, "sync run started");

        match self.run_paging(&job_id, window).await {
            Ok((total_pages, state)) => {
                let summary = summarize_errors(&state.errors);
                self.jobs.complete_job(&job_id, summary.as_deref()).await?;
                // Any successful run advances the watermark: the next
                // incremental run picks up from today.
                self.jobs.set_last_full_sync(today).await?;

                info!(
                    %job_id,
                    processed_pages = state.processed_pages,
                    processed_records = state.processed_records,
                    new_records = state.new_records,
                    updated_records = state.updated_records,
                    errors = state.errors.len(),
                    "sync run completed"
                );

                Ok(SyncReport {
                    job_id,
                    sync_type: mode,
                    total_pages,
                    processed_pages: state.processed_pages,
                    processed_records: state.processed_records,
                    new_records: state.new_records,
                    updated_records: state.updated_records,
                    errors: state.errors,
                })
            }
            Err(e) => {
                error!(%job_id, error = %e, "sync run failed");
                if let Err(mark_err) = self.jobs.fail_job(&job_id, &format!("{e:#}")).await {
                    error!(%job_id, error = %mark_err, "could not mark sync job failed");
                }
                Err(e)
            }
        }
    }

    async fn run_paging(&self, job_id: &str, window: DateWindow) -> Result<(u32, SyncRunState)> {
        // Probe page 0 with page-size 1 purely for the pagination metadata.
        let probe = self
            .fetcher
            .fetch_page(0, 1, window)
            .await
            .context("page-count probe failed")?;
        let total_pages = probe.total_pages;
        let estimated_records = u64::from(total_pages) * u64::from(self.config.page_size);
        self.jobs.set_totals(job_id, total_pages, estimated_records).await?;
        info!(total_pages, estimated_records, "page probe complete");

        let state = Arc::new(Mutex::new(SyncRunState::default()));
        let limiter = FetchLimiter::new(self.config.max_concurrent_fetches);
        let pace_delay = Duration::from_millis(self.config.pace_delay_ms);

        let mut tasks = Vec::with_capacity(total_pages as usize);
        for page in 0..total_pages {
            // Inter-batch pacing: after every pace_every dispatches, hold
            // off before dispatching more.
            if page > 0 && self.config.pace_every > 0 && page % self.config.pace_every == 0 {
                sleep(pace_delay).await;
            }

            let fetcher = Arc::clone(&self.fetcher);
            let records = self.records.clone();
            let jobs = self.jobs.clone();
            let state = Arc::clone(&state);
            let limiter = limiter.clone();
            let job_id = job_id.to_string();
            let page_size = self.config.page_size;

            tasks.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await?;

                match fetcher.fetch_page(page, page_size, window).await {
                    Ok(envelope) => {
                        if envelope.records.is_empty() {
                            warn!(page, "page returned no records");
                        }
                        for raw in &envelope.records {
                            process_record(&records, &state, page, raw).await;
                        }
                    }
                    Err(e) => {
                        warn!(page, error = %e, "page fetch failed, skipping page");
                        state.lock().await.record_error(page, None, e.to_string());
                    }
                }

                let (done, snapshot) = {
                    let mut s = state.lock().await;
                    s.processed_pages += 1;
                    (s.processed_pages, s.clone())
                };
                // Pages finish out of order; the counters are cumulative,
                // so flushing on every Nth completion is safe.
                if done % PROGRESS_FLUSH_PAGES == 0 || done == total_pages {
                    jobs.update_progress(
                        &job_id,
                        snapshot.processed_pages,
                        snapshot.processed_records,
                        snapshot.new_records,
                        snapshot.updated_records,
                    )
                    .await?;
                }
                Ok::<(), anyhow::Error>(())
            }));
        }

        for result in join_all(tasks).await {
            result.context("page task aborted")??;
        }

        if total_pages == 0 {
            self.jobs.update_progress(job_id, 0, 0, 0, 0).await?;
        }

        let state = state.lock().await.clone();
        Ok((total_pages, state))
    }
}

/// Decode and upsert one raw record, folding any failure into the run's
/// error list instead of propagating it.
async fn process_record(
    records: &ConvocatoriaRepository,
    state: &Mutex<SyncRunState>,
    page: u32,
    raw: &Value,
) {
    let codigo = natural_key(raw);
    let outcome = match convocatoria_from_raw(raw) {
        Ok(record) => records.upsert(&record).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(inserted) => state.lock().await.record_upsert(inserted),
        Err(e) => {
            warn!(page, codigo = codigo.as_deref().unwrap_or("?"), error = %e, "record failed");
            state.lock().await.record_error(page, codigo, e.to_string());
        }
    }
}

/// Compute the inclusive date window for a run.
///
/// Incremental starts at the stored watermark (falling back to the full
/// window start on a fresh database); the fixed modes end at Dec 31 of next
/// year so forward-dated entries are covered.
pub fn resolve_window(mode: SyncMode, watermark: Option<NaiveDate>, today: NaiveDate) -> DateWindow {
    let ymd = |(y, m, d): (i32, u32, u32)| {
        NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
    };
    let end_of_next_year =
        NaiveDate::from_ymd_opt(today.year() + 1, 12, 31).unwrap_or(NaiveDate::MAX);

    match mode {
        SyncMode::Incremental => DateWindow {
            desde: watermark.unwrap_or_else(|| ymd(FULL_SYNC_START)),
            hasta: today,
        },
        SyncMode::Full => DateWindow {
            desde: ymd(FULL_SYNC_START),
            hasta: end_of_next_year,
        },
        SyncMode::CompleteHistorical => DateWindow {
            desde: ymd(HISTORICAL_SYNC_START),
            hasta: end_of_next_year,
        },
    }
}

fn summarize_errors(errors: &[crate::domain::SyncError]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let shown: Vec<String> = errors
        .iter()
        .take(ERROR_SUMMARY_LIMIT)
        .map(ToString::to_string)
        .collect();
    Some(format!("{} error(s): {}", errors.len(), shown.join("; ")))
}
