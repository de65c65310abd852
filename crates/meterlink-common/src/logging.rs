//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing subscriber setup for the bridge daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{ApplicationConfig, LoggingConfig};

const LOG_ENV: &str = "METERLINK_LOG";

/// Crates whose output is clamped when `quiet_third_party` is set.
const THIRD_PARTY_TARGETS: &[&str] = &["opcua", "tokio_serial", "mio_serial", "hyper"];

/// Workspace crates raised to `debug` when `verbose` is set.
const WORKSPACE_TARGETS: &[&str] = &[
    "meterlink_common",
    "meterlink_logging",
    "meterlink_sensor",
    "meterlink_ua",
    "meterlink_core",
    "meterlinkd",
];

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Build the filter directive string from the application settings.
///
/// The configured level is the base; `verbose` raises the workspace crates to
/// `debug` and `quiet_third_party` clamps protocol libraries to `warn`.
pub fn filter_directives(app: &ApplicationConfig) -> String {
    let mut directives = vec![app.log_level.trim().to_lowercase()];
    if app.verbose {
        directives.extend(WORKSPACE_TARGETS.iter().map(|t| format!("{t}=debug")));
    }
    if app.quiet_third_party {
        directives.extend(THIRD_PARTY_TARGETS.iter().map(|t| format!("{t}=warn")));
    }
    directives.join(",")
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `METERLINK_LOG` overrides the filter entirely, then `RUST_LOG`, then the
///   directives derived from [`ApplicationConfig`].
/// * Stdout uses the configured [`LogFormat`]; when `file_enabled` is set a daily
///   rolling JSON file is written under `logging.directory`.
pub fn init_tracing(
    service_name: &str,
    config: &LoggingConfig,
    app: &ApplicationConfig,
) -> Result<()> {
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(stdout_guard);

    let configured = filter_directives(app);
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); falling back to {}",
                LOG_ENV, err, configured
            );
            EnvFilter::new(&configured)
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&configured)),
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = if config.file_enabled {
        std::fs::create_dir_all(&config.directory).with_context(|| {
            format!("unable to create log directory {}", config.directory.display())
        })?;
        let prefix = config
            .file_prefix
            .clone()
            .unwrap_or_else(|| service_name.to_owned());
        let file_appender = daily(&config.directory, format!("{}.log", prefix));
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(file_guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        format = ?config.format,
        file_enabled = config.file_enabled,
        log_dir = %config.directory.display(),
        "tracing initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_and_verbose_directives() {
        let app = ApplicationConfig {
            log_level: "INFO".to_owned(),
            verbose: true,
            quiet_third_party: true,
            ..ApplicationConfig::default()
        };
        let directives = filter_directives(&app);
        assert!(directives.starts_with("info,"));
        assert!(directives.contains("meterlink_core=debug"));
        assert!(directives.contains("opcua=warn"));
        EnvFilter::try_new(&directives).unwrap();
    }

    #[test]
    fn plain_level_only() {
        let app = ApplicationConfig {
            log_level: "warn".to_owned(),
            quiet_third_party: false,
            ..ApplicationConfig::default()
        };
        assert_eq!(filter_directives(&app), "warn");
    }
}
