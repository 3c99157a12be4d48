use tracing::{Span, info_span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Installs the global subscriber: JSON to a daily-rotated file, human-readable to stdout.
///
/// The returned guard flushes the file writer on drop and must be held for the
/// lifetime of the process.
pub fn init_logging(log_dir: &str, file_name: &str) -> WorkerGuard {
    let file_appender = rolling::daily(log_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info,sea_orm=warn` level if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}

/// Span wrapping the execution of a single queued task. Every log line emitted
/// by the handler carries the task identity and a fresh trace id.
pub fn task_span(task_id: &str, kind: &str, attempt: u32) -> Span {
    info_span!(
        "task",
        trace_id = %Uuid::new_v4(),
        task_id = %task_id,
        kind = %kind,
        attempt = attempt,
    )
}
