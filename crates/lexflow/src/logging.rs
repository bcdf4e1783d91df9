//! Global tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::LexflowError;

/// Installs the global subscriber and bridges `log` records into it.
///
/// `RUST_LOG` wins over the configured level. Calling this twice returns an
/// error instead of panicking.
pub fn init(settings: &LoggingSettings) -> Result<(), LexflowError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| LexflowError::Logging(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match settings.format {
        LogFormat::Pretty => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
        }
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };
    installed.map_err(|e| LexflowError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| LexflowError::Logging(e.to_string()))?;
    Ok(())
}
