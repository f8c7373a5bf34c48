//! Logging initialisation for bhyve-image-builder.
//!
//! Build progress goes to stderr, filtered by `RUST_LOG` (default `info`).
//! When `BHYVE_BUILD_LOG=1`, every line is also written without colour to
//! `build.log` in the per-user log directory.
//!
//! Returns a guard that must be kept alive for the duration of the process
//! so that buffered log lines are flushed on exit.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::paths::BuilderPaths;

pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise the global tracing subscriber.
///
/// Call once from `main` and hold the returned `LogGuard` until exit.
pub fn init() -> LogGuard {
    let file_guard = if std::env::var("BHYVE_BUILD_LOG").as_deref() == Ok("1") {
        let dir = BuilderPaths::resolve()
            .map(|p| p.logs)
            .unwrap_or_else(|| std::env::temp_dir().join("bhyve-image-builder"));
        let _ = std::fs::create_dir_all(&dir);
        let file_appender = tracing_appender::rolling::never(dir, "build.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();

        None
    };

    LogGuard { _file_guard: file_guard }
}
