//! Application module - orchestration and the job-control surface

pub mod sync_orchestrator;
pub mod sync_service;

pub use sync_orchestrator::{SyncOrchestrator, resolve_window};
pub use sync_service::SyncService;
