//! Opt-in log output.
//!
//! Every crate in the workspace emits `tracing` events: one `debug` event
//! per executed statement, `info` events for migrations and connections,
//! `warn` events for retried transactions. Applications that already
//! install a subscriber see them with no further setup. [`init`] installs
//! one from environment variables for applications that don't:
//!
//! - `QUARRY_DEBUG=1|true|yes` enables debug output
//! - `QUARRY_LOG_LEVEL=trace|debug|info|warn|error` picks a level
//! - `QUARRY_LOG_FORMAT=json|pretty|compact` picks the format (default `compact`)
//!
//! ```rust,no_run
//! quarry_query::logging::init();
//! ```
//!
//! Installing the subscriber needs the `tracing-subscriber` feature;
//! without it [`init`] does nothing.

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human readable output.
    Pretty,
    /// Single-line human readable output.
    Compact,
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Level directive for the workspace crates.
    pub level: &'static str,
    /// Output format.
    pub format: LogFormat,
    /// Whether anything asked for output at all.
    pub requested: bool,
}

impl LogSettings {
    /// Settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let debug = lookup("QUARRY_DEBUG")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        let explicit = lookup("QUARRY_LOG_LEVEL").and_then(|level| match level.to_lowercase().as_str() {
            "trace" => Some("trace"),
            "debug" => Some("debug"),
            "info" => Some("info"),
            "warn" => Some("warn"),
            "error" => Some("error"),
            _ => None,
        });
        let format = match lookup("QUARRY_LOG_FORMAT").map(|f| f.to_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Compact,
        };

        Self {
            level: explicit.unwrap_or(if debug { "debug" } else { "warn" }),
            format,
            requested: debug || explicit.is_some(),
        }
    }

    /// `EnvFilter` directive covering the workspace crates.
    pub fn directive(&self) -> String {
        ["quarry", "quarry_query", "quarry_orm", "quarry_migrate", "quarry_sqlite"]
            .iter()
            .map(|target| format!("{}={}", target, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Whether `QUARRY_DEBUG` is set.
pub fn is_debug_enabled() -> bool {
    LogSettings::from_env().level == "debug"
}

/// Install a global subscriber configured from the environment.
///
/// Runs at most once per process and does nothing unless `QUARRY_DEBUG` or
/// `QUARRY_LOG_LEVEL` is set.
pub fn init() {
    INIT.call_once(|| {
        let settings = LogSettings::from_env();
        if !settings.requested {
            return;
        }
        install(settings);
    });
}

#[cfg(feature = "tracing-subscriber")]
fn install(settings: LogSettings) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_new(settings.directive()).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match settings.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    if installed.is_ok() {
        tracing::info!(level = settings.level, format = ?settings.format, "quarry logging initialized");
    }
}

#[cfg(not(feature = "tracing-subscriber"))]
fn install(_settings: LogSettings) {}
