//! provides logging helpers

use std::path::Path;
use std::str::FromStr;

use tracing::Subscriber;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable pointing at a log file; logs go to stderr when unset.
pub const LOG_PATH_ENV_VAR: &str = "MIGRATOR_LOG_PATH";

const DEFAULT_LOG_PREFIX: &str = "migrator.log";

/// Parse a textual log level such as `INFO` or `debug`.
///
/// Empty or unknown values fall back to `INFO`.
pub fn parse_level(level: &str) -> filter::LevelFilter {
    let level = level.trim();
    if level.is_empty() {
        return filter::LevelFilter::INFO;
    }
    filter::LevelFilter::from_str(level).unwrap_or(filter::LevelFilter::INFO)
}

/// Build the human readable fmt layer.
///
/// When `log_path` is set, output goes to a daily rolling file under that path and
/// the returned guard must be held for as long as logs should be flushed.
pub fn get_fmt_layer<S>(
    log_path: Option<String>,
) -> (Box<dyn Layer<S> + Send + Sync + 'static>, Option<WorkerGuard>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let Some(log_path) = log_path.filter(|p| !p.is_empty()) else {
        let fmt_layer = layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed();
        return (fmt_layer, None);
    };

    let path = Path::new(&log_path);
    let (dir, prefix) = if path.is_dir() {
        (path, DEFAULT_LOG_PREFIX)
    } else {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DEFAULT_LOG_PREFIX);
        (dir, prefix)
    };

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(7)
        .build(dir)
    {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let fmt_layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (fmt_layer, Some(guard))
        }
        Err(err) => {
            eprintln!(
                "failed to create rolling log file at {}: {err}; falling back to stderr",
                dir.display()
            );
            let fmt_layer = layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed();
            (fmt_layer, None)
        }
    }
}

/// initiate the global tracing subscriber
///
/// `default_level` seeds the env filter; `RUST_LOG` still takes precedence.
pub fn init(default_level: &str) -> Option<WorkerGuard> {
    let log_path = std::env::var(LOG_PATH_ENV_VAR).ok();
    let (fmt_layer, guard) = get_fmt_layer::<tracing_subscriber::Registry>(log_path);

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(parse_level(default_level).into())
        .from_env_lossy();

    registry().with(fmt_layer.with_filter(env_filter)).init();
    guard
}
