//! Structured logging for werk
//!
//! All logs use structured fields so runs can be filtered and aggregated.
//!
//! # Field Conventions
//!
//! - `target`: Target being visited
//! - `goal`: Goal requested for the run
//! - `operation`: What is happening ("visit", "execute", "provision", "verify")
//! - `status`: Outcome ("success", "skipped", "hit", "miss", "error")
//! - `reason`: Why a target is (or is not) stale
//! - `tool` / `version`: Tool being provisioned
//!
//! ```rust
//! use tracing::info;
//!
//! info!(
//!     target = "crds",
//!     operation = "visit",
//!     status = "skipped",
//!     reason = "up to date",
//!     "target up to date"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Formatter that labels every line "(werk)" instead of a module path
struct WerkFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for WerkFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(werk)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(werk): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Plain text for CI logs
    Compact,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Parse a format name; unknown names yield `None`
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// Format from `WERK_LOG_FORMAT`, else `fallback`, else compact in CI
    pub fn from_env(fallback: Option<&str>) -> Self {
        std::env::var("WERK_LOG_FORMAT")
            .ok()
            .and_then(|name| Self::parse(&name))
            .or_else(|| fallback.and_then(Self::parse).filter(|f| *f != Self::Pretty))
            .unwrap_or_else(|| {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            })
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Log filter (overrides `default_level`)
/// - `WERK_LOG_FORMAT`: "pretty", "compact" or "json"
/// - `CI`: If set, defaults to compact format
///
/// `default_level` and `format` usually come from `[observability]` in
/// `werk.toml`.
pub fn init(default_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match format {
        LogFormat::Pretty | LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(WerkFormatter {
                        with_ansi: format == LogFormat::Pretty,
                    })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };

    // Already initialized (e.g. by an embedding test harness)
    let _ = result;
}

/// Standard operation names
pub mod operations {
    pub const RUN: &str = "run";
    pub const VISIT: &str = "visit";
    pub const EXECUTE: &str = "execute";
    pub const PROVISION: &str = "provision";
    pub const VERIFY: &str = "verify";
}

/// Standard status values
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const SKIPPED: &str = "skipped";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_format() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    #[serial]
    fn test_env_wins_over_config() {
        std::env::set_var("WERK_LOG_FORMAT", "json");
        assert_eq!(LogFormat::from_env(Some("compact")), LogFormat::Json);
        std::env::remove_var("WERK_LOG_FORMAT");
    }

    #[test]
    #[serial]
    fn test_ci_defaults_to_compact() {
        let previous = std::env::var("CI").ok();
        std::env::remove_var("WERK_LOG_FORMAT");
        std::env::set_var("CI", "true");

        assert_eq!(LogFormat::from_env(None), LogFormat::Compact);
        assert_eq!(LogFormat::from_env(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::from_env(Some("json")), LogFormat::Json);

        match previous {
            Some(value) => std::env::set_var("CI", value),
            None => std::env::remove_var("CI"),
        }
    }
}
