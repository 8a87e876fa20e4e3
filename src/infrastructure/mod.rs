//! Infrastructure module - external collaborators of the sync engine
//!
//! Configuration, logging, the SQLite store and the registry HTTP boundary.

pub mod config;
pub mod convocatoria_repository;
pub mod database_connection;
pub mod logging;
pub mod normalizer;
pub mod registry_client;
pub mod sync_repository;

pub use config::{AppConfig, ConfigManager};
pub use convocatoria_repository::ConvocatoriaRepository;
pub use database_connection::DatabaseConnection;
pub use registry_client::{DateWindow, FetchLimiter, PageProvider, RegistryClient};
pub use sync_repository::SyncJobRepository;
