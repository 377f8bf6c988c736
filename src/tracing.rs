use std::path::Path;

use backtrace::Backtrace;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE: &str = "explorer.log";

/// Installs the global subscriber.
///
/// The filter comes from `LOG_LEVEL` (`info` when unset). Logs go to stderr so they never
/// mix with command output; when `log_dir` is given they're also written to a daily rolling
/// file, and the returned guard must be held until exit to flush it.
pub fn setup_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .boxed();

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    set_panic_hook();

    guard
}

fn set_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        let backtrace = Backtrace::new();
        match panic.location() {
            Some(location) => tracing::error!(
                message = %panic,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
                backtrace = ?backtrace,
            ),
            None => tracing::error!(message = %panic, backtrace = ?backtrace),
        }
    }));
}
