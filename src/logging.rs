//! Structured logging setup
//!
//! Human-readable or JSON logs on stderr, optionally mirrored to a file.
//! stdout is left to command output such as authorize URLs and JSON state.

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Arguments
///
/// * `config` - Logging configuration
///
/// # Errors
///
/// Returns an error for an invalid level directive or an unwritable log
/// file, or when a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use simple_oidc::config::LoggingConfig;
/// use simple_oidc::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     json_format: false,
///     file_path: None,
/// };
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    if config.json_format {
        let stderr_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);
        let file_layer = file.map(|file| {
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(file)
        });
        registry.with(stderr_layer).with(file_layer).try_init()?;
    } else {
        let stderr_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr);
        let file_layer = file.map(|file| {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(file)
        });
        registry.with(stderr_layer).with(file_layer).try_init()?;
    }

    Ok(())
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json_format);
        assert_eq!(config.file_path, None);
    }

    #[test]
    fn test_build_filter_accepts_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("simple_oidc=debug,reqwest=warn").is_ok());
    }
}
