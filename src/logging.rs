use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::config::LogSettings;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install stdout and daily-rolling file logging. Later calls are no-ops.
pub fn init(settings: &LogSettings) {
    if LOG_GUARD.get().is_some() {
        return;
    }
    let _ = std::fs::create_dir_all(&settings.dir);

    let file_appender = tracing_appender::rolling::daily(&settings.dir, &settings.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&settings.default_filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(non_blocking);

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    if installed.is_ok() {
        let _ = LOG_GUARD.set(guard);
    }
}
