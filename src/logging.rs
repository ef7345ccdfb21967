//! Logging setup on tracing + tracing-subscriber
//!
//! Console output (compact or JSON), an optional daily-rotated log file, and
//! `RUST_LOG` overrides on top of the configured level.

use std::fs;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Dependencies whose logs are capped at `warn`
const QUIET_TARGETS: [&str; 5] = ["hyper", "reqwest", "rustls", "tokio_tungstenite", "tungstenite"];

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the file writer alive; drop it last to flush buffered lines
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber
pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(settings, verbose, quiet);
    let filter = build_filter(level)?;

    let (file_layer, file_guard) = match settings.file.as_deref().filter(|f| !f.is_empty()) {
        Some(path) => {
            let (layer, guard) = file_layer(path, settings.max_files, settings.json_format)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer(settings.json_format))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(level = %level, file = ?settings.file, json = settings.json_format, "Logging initialized");

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

/// `-q` wins, then `-v`/`-vv`, then the configured level
fn effective_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => parse_level(&settings.level),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn build_filter(level: Level) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let mut directives = vec![format!("chatlink={}", level).to_lowercase()];
    directives.extend(QUIET_TARGETS.iter().map(|t| format!("{}=warn", t)));

    for directive in directives {
        let parsed = directive
            .parse()
            .map_err(|e| Error::Internal(format!("Invalid log directive '{}': {}", directive, e)))?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

fn console_layer<S>(json: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .boxed()
    }
}

fn file_layer<S>(log_file: &str, max_files: u32, json: bool) -> Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let path = Path::new(log_file);
    let directory = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory).map_err(|e| Error::IoWrite {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let prefix = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("chatlink");

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(max_files.max(1) as usize)
        .build(directory)
        .map_err(|e| Error::Internal(format!("Failed to create log file appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = if json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .boxed()
    };

    Ok((layer, guard))
}
