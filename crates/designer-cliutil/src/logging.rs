// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{Context, Result};
use itertools::Itertools;
use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::Layer;

/// Name of the environment variable controlling the minimum level of
/// messages that get logged at all (to either stream).
pub const LOG_LEVEL_ENV: &str = "AUTOWARE_SYSTEM_DESIGNER_LOG_LEVEL";

/// Name of the environment variable controlling the minimum level of
/// informational messages printed to stdout. Anything at WARN or above
/// always goes to stderr regardless of this setting.
pub const PRINT_LEVEL_ENV: &str = "AUTOWARE_SYSTEM_DESIGNER_PRINT_LEVEL";

/// A guard object to perform cleanups with RAII.
pub struct LogGuard {
    _span_guard: tracing::span::EnteredSpan,
}

/// The configuration for the logger.
///
/// Logging is split-stream: informational messages go to stdout, while
/// warnings and errors go to stderr. This lets a caller pipe stdout into a
/// downstream tool while still seeing diagnostics on the terminal.
pub struct LoggingConfig {
    log_level: LevelFilter,
    print_level: LevelFilter,
}

fn parse_level_env(name: &str, default: LevelFilter) -> Result<LevelFilter> {
    match std::env::var(name).ok() {
        Some(level) if !level.is_empty() => level
            .parse::<LevelFilter>()
            .with_context(|| format!("invalid {name}: {level}")),
        _ => Ok(default),
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: parse_level_env(LOG_LEVEL_ENV, LevelFilter::INFO)?,
            print_level: parse_level_env(PRINT_LEVEL_ENV, LevelFilter::INFO)?,
        })
    }

    /// Sets up the standard tracing subscriber in accordance with the config, and starts a span
    /// named "main".
    pub fn setup(self) -> Result<LogGuard> {
        let print_level = self.print_level;
        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(std::io::stdout)
            .with_filter(EnvFilter::new(print_level.to_string()))
            .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
                *metadata.level() < Level::WARN
            }));

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(LevelFilter::WARN);

        tracing_subscriber::registry()
            .with(EnvFilter::builder().with_default_directive(self.log_level.into()).from_env()?)
            .with(stdout_layer)
            .with(stderr_layer)
            .try_init()
            .context("failed to start tracing; a tracing subscriber is likely already running")?;

        let args = std::env::args()
            .map(|s| shell_escape::escape(s.into()))
            .join(" ");
        let span_guard = tracing::trace_span!("main", args = args).entered();

        Ok(LogGuard {
            _span_guard: span_guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_defaults_to_info() {
        std::env::remove_var(LOG_LEVEL_ENV);
        std::env::remove_var(PRINT_LEVEL_ENV);
        let config = LoggingConfig::from_env().unwrap();
        assert_eq!(config.log_level, LevelFilter::INFO);
        assert_eq!(config.print_level, LevelFilter::INFO);
    }

    #[test]
    fn from_env_rejects_bad_level() {
        std::env::set_var(LOG_LEVEL_ENV, "not-a-level");
        let result = LoggingConfig::from_env();
        std::env::remove_var(LOG_LEVEL_ENV);
        assert!(result.is_err());
    }
}
