//! Unified logging module for the gateway services
//!
//! Console output plus a daily rolling file under `<root>/<service>/`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the log root directory
pub const LOG_DIR_ENV: &str = "GATEWAY_LOG_DIR";

/// Bracketed level tag: `[INFO]`, `[WARN]`, ...
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "\x1b[35m",
        Level::DEBUG => "\x1b[34m",
        Level::INFO => "\x1b[32m",
        Level::WARN => "\x1b[33m",
        Level::ERROR => "\x1b[31m",
    }
}

/// `2026-03-02T00:50:44.809123Z [INFO] Session connected`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        write!(
            writer,
            "{} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        let level = event.metadata().level();
        if writer.has_ansi_escapes() {
            write!(writer, "{}{}\x1b[0m ", level_color(level), format_level(level))?;
        } else {
            write!(writer, "{} ", format_level(level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// Non-blocking file worker; dropping it would lose buffered lines
static FILE_GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();

/// Resolve the log root: `GATEWAY_LOG_DIR` > `configured` > "logs"
pub fn resolve_log_root(configured: Option<&Path>) -> PathBuf {
    match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => configured
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("logs")),
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, also the log file prefix
    pub service_name: String,
    /// Directory for the rolling log files
    pub log_dir: PathBuf,
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// JSON lines in the log file instead of the bracketed format
    pub enable_json: bool,
    /// ANSI colors on the console
    pub ansi: bool,
    /// Write a log file at all
    pub enable_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: resolve_log_root(None),
            level: "info".to_string(),
            enable_json: false,
            ansi: true,
            enable_file: true,
        }
    }
}

/// Filter string, `RUST_LOG` wins over the configured level
fn initial_filter(config: &LogConfig) -> String {
    match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.is_empty() => env_str,
        _ => config.level.clone(),
    }
}

/// `{dir}/{service}.YYYY-MM-DD.log`, rolled at midnight
fn daily_appender(config: &LogConfig) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.service_name)
        .filename_suffix("log")
        .build(&config.log_dir)?;
    Ok(appender)
}

/// Install the global subscriber
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(initial_filter(&config))?;

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_file {
        let (non_blocking, guard) = tracing_appender::non_blocking(daily_appender(&config)?);
        let slot = FILE_GUARD.get_or_init(|| Mutex::new(None));
        match slot.lock() {
            Ok(mut held) => *held = Some(guard),
            Err(poisoned) => *poisoned.into_inner() = Some(guard),
        }

        let layer = if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_configured_root_used_without_env() {
        if std::env::var(LOG_DIR_ENV).is_err() {
            assert_eq!(
                resolve_log_root(Some(Path::new("/var/log/gw"))),
                PathBuf::from("/var/log/gw")
            );
            assert_eq!(resolve_log_root(None), PathBuf::from("logs"));
        }
    }

    #[test]
    fn test_daily_appender_writes_prefixed_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            service_name: "bridgesrv".to_string(),
            log_dir: dir.path().join("bridgesrv"),
            ..Default::default()
        };

        let mut appender = daily_appender(&config).unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let files: Vec<String> = std::fs::read_dir(&config.log_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("bridgesrv."));
        assert!(files[0].ends_with(".log"));
    }
}
