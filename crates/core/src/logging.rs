use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log directory used when the embedder passes none: `~/.keyindex/logs`.
pub fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".keyindex/logs")
}

/// Installs the global subscriber for a process embedding the engine.
///
/// The engine itself only emits `tracing` events; call this once from the
/// binary and keep the returned guard alive for as long as logs should flush.
pub fn init_logging(component: &str, log_dir: Option<&Path>, to_stderr: bool) -> WorkerGuard {
    let log_dir = log_dir.map(Path::to_path_buf).unwrap_or_else(default_log_dir);
    let _ = std::fs::create_dir_all(&log_dir);

    // One file per day, prefixed with the component name (e.g. indexer.2026-10-17)
    let file_appender = tracing_appender::rolling::daily(&log_dir, component);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if to_stderr {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false);
        let _ = registry.with(stderr_layer).try_init();
    } else {
        let _ = registry.try_init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_file_is_created_under_the_given_dir() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_logging("indexer", Some(dir.path()), false);
        tracing::info!("hello from the test");
        drop(guard);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|name| name.starts_with("indexer")), "got {names:?}");
    }
}
