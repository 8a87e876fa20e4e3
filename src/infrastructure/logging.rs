//! Logging initialization
//!
//! Console output always; optional non-blocking file output when the config
//! asks for it. The file writer guard has to outlive the subscriber, so it
//! is parked in a process-wide slot.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use lazy_static::lazy_static;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::infrastructure::config::LoggingConfig;

lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());
}

fn default_log_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logs")
}

/// Initialize the global subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bdns_sync={}", config.level)));

    let console_layer = fmt::layer().with_target(false);

    if config.file_output {
        let log_dir = config.log_dir.clone().unwrap_or_else(default_log_dir);
        std::fs::create_dir_all(&log_dir)?;
        let appender = rolling::daily(&log_dir, "bdns-sync.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if let Ok(mut guards) = LOG_GUARDS.lock() {
            guards.push(guard);
        }

        let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
        Registry::default()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;
    } else {
        Registry::default()
            .with(filter)
            .with(console_layer)
            .try_init()?;
    }

    Ok(())
}
