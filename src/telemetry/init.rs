// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber setup.

use std::io::{self, IsTerminal};

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// How log output is filtered and formatted.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level for this crate when neither `RUST_LOG` nor `filter_directive`
    /// is set. Dependencies stay at `warn`.
    pub default_level: Level,

    /// Log span enter/exit.
    pub include_span_events: bool,

    pub include_file_line: bool,

    pub include_target: bool,

    pub ansi_colors: bool,

    pub compact: bool,

    /// Explicit filter directive. Wins over `RUST_LOG`.
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::WARN,
            include_span_events: false,
            include_file_line: false,
            include_target: false,
            ansi_colors: io::stderr().is_terminal(),
            compact: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Map the CLI's `-v` count onto a level: 0 warn, 1 info, 2 debug,
    /// 3 or more trace with span events.
    pub fn for_verbosity(verbose: u8) -> Self {
        let default_level = match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            default_level,
            include_span_events: verbose >= 3,
            include_file_line: verbose >= 3,
            include_target: verbose >= 2,
            ..Self::default()
        }
    }

    /// Long-running daemon: info level, full format, no colors.
    pub fn daemon() -> Self {
        Self {
            default_level: Level::INFO,
            include_target: true,
            ansi_colors: false,
            compact: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
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

    fn default_directive(&self) -> String {
        format!("warn,tracehound={}", self.default_level.as_str().to_lowercase())
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_directive());
        match &self.filter_directive {
            Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Returned by [`init_telemetry`]; keep it alive for the life of the
/// program.
#[must_use]
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean. Fails if a subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(config.env_filter());
    let installed = if config.compact {
        registry.with(fmt_layer.compact()).try_init()
    } else {
        registry.with(fmt_layer).try_init()
    };
    installed.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}
