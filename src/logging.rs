//! Logging setup.
//!
//! The crate itself only emits `tracing` events; binaries embedding it call
//! `init_logging` once at startup to install a subscriber.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level.
pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&settings.level)?),
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(settings)?;

    if settings.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()?;
    }

    Ok(())
}
