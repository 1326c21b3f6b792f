use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Wire up console and file logging. The console layer is compact and
/// colourful; the file layer rotates daily under `logs/` with ANSI stripped
/// so the files stay greppable.
///
/// The returned guard owns the background writer thread; it must live until
/// process exit or buffered lines are lost.
pub fn init() -> WorkerGuard {
    let filter =
        EnvFilter::try_from_env("DITTO_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = env::var("DITTO_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "ditto.log"));

    let console_layer = fmt::layer().compact().with_target(false);
    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
