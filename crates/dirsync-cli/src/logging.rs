//! Log sink configuration: console plus an optional rolling audit file.
//!
//! The console layer honors `--quiet` and `--debug`; the file layer writes
//! one file per day under the job's log directory and prunes old files down
//! to the job's retention limit.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _};

/// Install the global subscriber.
///
/// The returned guard must stay alive for the duration of the program, or
/// buffered file records are lost on exit.
pub fn init(
    log_dir: Option<&Path>,
    log_file_limit: usize,
    quiet: bool,
    debug: bool,
) -> Result<Option<WorkerGuard>> {
    // RUST_LOG overrides everything, as usual.
    let default_directives = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let console_level = if quiet {
        LevelFilter::WARN
    } else if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(console_level);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let mut builder = Builder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix("dirsync")
                .filename_suffix("log");
            if log_file_limit > 0 {
                builder = builder.max_log_files(log_file_limit);
            }
            let appender = builder.build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}
