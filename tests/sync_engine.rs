//! End-to-end sync runs against a mock page provider and a scratch SQLite
//! database: happy path, fault isolation, watermark handling, fatal probe
//! failure.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use bdns_sync::application::SyncOrchestrator;
use bdns_sync::domain::{SyncMode, SyncStatus};
use bdns_sync::infrastructure::config::RegistryConfig;
use bdns_sync::infrastructure::registry_client::{DateWindow, FetchError, PageEnvelope, PageProvider};
use bdns_sync::infrastructure::{ConvocatoriaRepository, DatabaseConnection, SyncJobRepository};

/// Serves canned pages and records the windows it was asked for.
struct MockRegistry {
    pages: Vec<Vec<Value>>,
    /// Page indices whose bulk fetch fails.
    failing_pages: HashSet<u32>,
    /// Fail the page-size-1 probe itself.
    fail_probe: bool,
    seen_windows: Mutex<Vec<DateWindow>>,
}

impl MockRegistry {
    fn new(pages: Vec<Vec<Value>>) -> Self {
        Self {
            pages,
            failing_pages: HashSet::new(),
            fail_probe: false,
            seen_windows: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PageProvider for MockRegistry {
    async fn fetch_page(
        &self,
        page: u32,
        page_size: u32,
        window: DateWindow,
    ) -> Result<PageEnvelope, FetchError> {
        self.seen_windows.lock().await.push(window);

        if page_size <= 1 {
            if self.fail_probe {
                return Err(FetchError::Envelope("probe exploded".into()));
            }
            return Ok(PageEnvelope {
                total_pages: self.pages.len() as u32,
                page,
                page_size,
                records: Vec::new(),
            });
        }

        if self.failing_pages.contains(&page) {
            return Err(FetchError::Envelope("missing convocatorias map".into()));
        }

        Ok(PageEnvelope {
            total_pages: self.pages.len() as u32,
            page,
            page_size,
            records: self.pages[page as usize].clone(),
        })
    }
}

fn record(codigo: &str) -> Value {
    json!({
        "codigo-BDNS": codigo,
        "titulo": format!("Convocatoria {codigo}"),
        "desc-organo": "AYUNTAMIENTO DE MADRID",
        "fecha-registro": "15/06/2023",
        "inicio-solicitud": "16/06/2023",
        "fin-solicitud": "16/07/2023",
        "abierto": true,
        "financiacion": [{"importe": "1000"}, {"importe": 500.5}],
        "tipo-beneficiario": ["PYME"]
    })
}

fn test_config() -> RegistryConfig {
    RegistryConfig {
        page_size: 5,
        max_concurrent_fetches: 3,
        pace_every: 0,
        pace_delay_ms: 0,
        ..RegistryConfig::default()
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    records: ConvocatoriaRepository,
    jobs: SyncJobRepository,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("sync.db").display());
    let db = DatabaseConnection::new(&url, 5).await.unwrap();
    db.migrate().await.unwrap();
    Harness {
        records: ConvocatoriaRepository::new(db.pool().clone()),
        jobs: SyncJobRepository::new(db.pool().clone()),
        _dir: dir,
    }
}

fn orchestrator(h: &Harness, registry: Arc<MockRegistry>) -> SyncOrchestrator {
    SyncOrchestrator::new(registry, h.records.clone(), h.jobs.clone(), test_config())
}

#[tokio::test]
async fn full_run_mirrors_all_pages() {
    let h = harness().await;
    let registry = Arc::new(MockRegistry::new(vec![
        vec![record("100001"), record("100002")],
        vec![record("100003")],
    ]));

    let report = orchestrator(&h, Arc::clone(&registry))
        .run(SyncMode::Full)
        .await
        .unwrap();

    assert_eq!(report.total_pages, 2);
    assert_eq!(report.processed_pages, 2);
    assert_eq!(report.processed_records, 3);
    assert_eq!(report.new_records, 3);
    assert_eq!(report.updated_records, 0);
    assert!(report.errors.is_empty());

    assert_eq!(h.records.count().await.unwrap(), 3);
    let stored = h.records.get_by_codigo("100002").await.unwrap().unwrap();
    assert_eq!(stored.importe_total, Some(1500.5));
    assert!(stored.abierto);

    let job = h.jobs.get_latest_job().await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Completed);
    assert_eq!(job.processed_records, 3);
    // Estimate comes from the probe: total_pages * page_size.
    assert_eq!(job.total_records, 10);
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn second_run_reports_updates_not_duplicates() {
    let h = harness().await;
    let pages = vec![vec![record("200001"), record("200002")]];
    let registry = Arc::new(MockRegistry::new(pages));

    orchestrator(&h, Arc::clone(&registry))
        .run(SyncMode::Full)
        .await
        .unwrap();
    let report = orchestrator(&h, registry).run(SyncMode::Full).await.unwrap();

    assert_eq!(report.new_records, 0);
    assert_eq!(report.updated_records, 2);
    assert_eq!(h.records.count().await.unwrap(), 2);
}

#[tokio::test]
async fn bad_record_does_not_stop_its_page() {
    let h = harness().await;
    let mut page = vec![
        record("300001"),
        json!({"titulo": "sin código"}), // no natural key
        record("300003"),
        record("300004"),
        record("300005"),
    ];
    // Records arrive as a map upstream; order within a page is irrelevant.
    page.rotate_left(1);
    let registry = Arc::new(MockRegistry::new(vec![page]));

    let report = orchestrator(&h, registry).run(SyncMode::Full).await.unwrap();

    assert_eq!(report.processed_records, 4);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].page, 0);
    assert!(report.errors[0].codigo_bdns.is_none());
    assert_eq!(h.records.count().await.unwrap(), 4);

    // Partial success is surfaced, not swallowed.
    let job = h.jobs.get_latest_job().await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Completed);
    assert!(job.error_message.unwrap().contains("1 error(s)"));
}

#[tokio::test]
async fn failed_page_is_skipped_and_run_continues() {
    let h = harness().await;
    let mut registry = MockRegistry::new(vec![
        vec![record("400001")],
        vec![record("400002")],
        vec![record("400003")],
    ]);
    registry.failing_pages.insert(1);
    let registry = Arc::new(registry);

    let report = orchestrator(&h, registry).run(SyncMode::Full).await.unwrap();

    assert_eq!(report.processed_pages, 3);
    assert_eq!(report.processed_records, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].page, 1);
    assert!(h.records.get_by_codigo("400002").await.unwrap().is_none());
    assert!(h.records.get_by_codigo("400003").await.unwrap().is_some());

    let job = h.jobs.get_latest_job().await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Completed);
}

#[tokio::test]
async fn incremental_run_uses_and_advances_the_watermark() {
    let h = harness().await;
    let watermark = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    h.jobs.set_last_full_sync(watermark).await.unwrap();

    let registry = Arc::new(MockRegistry::new(vec![vec![record("500001")]]));
    orchestrator(&h, Arc::clone(&registry))
        .run(SyncMode::Incremental)
        .await
        .unwrap();

    let today = Utc::now().date_naive();
    let windows = registry.seen_windows.lock().await;
    assert!(!windows.is_empty());
    for window in windows.iter() {
        assert_eq!(window.desde, watermark);
        assert_eq!(window.hasta, today);
        assert_eq!(window.desde_param(), "01/01/2024");
    }
    drop(windows);

    assert_eq!(h.jobs.get_last_full_sync().await.unwrap(), Some(today));
    let job = h.jobs.get_latest_job().await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Completed);
}

#[tokio::test]
async fn probe_failure_is_fatal_and_marks_the_job_failed() {
    let h = harness().await;
    let mut registry = MockRegistry::new(vec![vec![record("600001")]]);
    registry.fail_probe = true;

    let result = orchestrator(&h, Arc::new(registry)).run(SyncMode::Full).await;
    assert!(result.is_err());

    let job = h.jobs.get_latest_job().await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Failed);
    assert!(job.error_message.unwrap().contains("probe"));
    assert_eq!(h.records.count().await.unwrap(), 0);

    // The failed run must not advance the watermark.
    assert!(h.jobs.get_last_full_sync().await.unwrap().is_none());
}

#[tokio::test]
async fn empty_window_completes_with_zero_pages() {
    let h = harness().await;
    let registry = Arc::new(MockRegistry::new(Vec::new()));

    let report = orchestrator(&h, registry).run(SyncMode::Incremental).await.unwrap();
    assert_eq!(report.total_pages, 0);
    assert_eq!(report.processed_records, 0);

    let job = h.jobs.get_latest_job().await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Completed);
}
