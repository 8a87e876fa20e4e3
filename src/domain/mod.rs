//! Domain module - Core entities of the sync engine
//!
//! Contains the mirrored grant entity, the persisted sync-job model and the
//! run-scoped progress state the orchestrator carries through a run.

pub mod convocatoria;
pub mod sync_job;

pub use convocatoria::{Convocatoria, DatabaseStatistics};
pub use sync_job::{SyncError, SyncJob, SyncMode, SyncReport, SyncRunState, SyncStatus};
