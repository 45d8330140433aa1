// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Log subscriber initialization.
//!
//! Pipeline logs always go to stderr. Commands print summaries and exports
//! on stdout, and `--output-format json` must stay parseable.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// How each log line is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLayout {
    /// One short line per event.
    Compact,
    /// Fields and span context on their own lines.
    Full,
}

/// Log output settings for the CLI and embedding collectors.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level for `agentmeter` targets when RUST_LOG is unset.
    pub crate_level: Level,

    /// Level for everything else (rusqlite, tokio, ...).
    pub dependency_level: Level,

    /// Log span close events, which carry publish and flush timings.
    pub span_timings: bool,

    /// Include source file and line.
    pub source_location: bool,

    pub ansi_colors: bool,
    pub layout: LogLayout,

    /// Explicit filter directive, taking precedence over RUST_LOG.
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            crate_level: Level::WARN,
            dependency_level: Level::WARN,
            span_timings: false,
            source_location: false,
            ansi_colors: true,
            layout: LogLayout::Compact,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Sink routing and per-event decisions, with span timings.
    pub fn development() -> Self {
        Self {
            crate_level: Level::DEBUG,
            span_timings: true,
            source_location: true,
            layout: LogLayout::Full,
            ..Self::default()
        }
    }

    /// Long-running collectors writing to a log file: warnings only, no colors.
    pub fn production() -> Self {
        Self {
            ansi_colors: false,
            ..Self::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            crate_level: Level::TRACE,
            span_timings: true,
            source_location: true,
            ansi_colors: false,
            layout: LogLayout::Full,
            ..Self::default()
        }
    }

    /// Preset for the `-v` / `--debug` CLI flags.
    ///
    /// `-v` shows pipeline lifecycle (sinks opened, replay progress) without
    /// per-event chatter; `--debug` shows everything.
    pub fn from_verbosity(verbose: bool, debug: bool) -> Self {
        if debug {
            Self::development()
        } else if verbose {
            Self::default().with_level(Level::INFO)
        } else {
            Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.crate_level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    /// Directive used when neither an explicit filter nor RUST_LOG is set.
    pub fn default_directive(&self) -> String {
        format!(
            "{},agentmeter={}",
            self.dependency_level.as_str().to_lowercase(),
            self.crate_level.as_str().to_lowercase()
        )
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_directive());
        match &self.filter_directive {
            Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Returned by [`init_telemetry`]; hold it for the life of the process.
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let span_events = if config.span_timings {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(config.env_filter());
    let result = match config.layout {
        LogLayout::Compact => registry.with(fmt_layer.compact()).try_init(),
        LogLayout::Full => registry.with(fmt_layer).try_init(),
    };
    result.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_quiet_by_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_directive(), "warn,agentmeter=warn");
        assert_eq!(config.layout, LogLayout::Compact);
    }

    #[test]
    fn test_verbosity_flags_only_raise_crate_level() {
        let verbose = TelemetryConfig::from_verbosity(true, false);
        assert_eq!(verbose.default_directive(), "warn,agentmeter=info");

        let debug = TelemetryConfig::from_verbosity(true, true);
        assert_eq!(debug.default_directive(), "warn,agentmeter=debug");
        assert!(debug.span_timings);
        assert_eq!(debug.dependency_level, Level::WARN);
    }

    #[test]
    fn test_explicit_sink_filter() {
        let config = TelemetryConfig::production()
            .with_filter("agentmeter::sinks=trace")
            .with_ansi(true);

        assert_eq!(
            config.filter_directive.as_deref(),
            Some("agentmeter::sinks=trace")
        );
        assert!(config.ansi_colors);
        assert_eq!(TelemetryConfig::testing().default_directive(), "warn,agentmeter=trace");
    }
}
