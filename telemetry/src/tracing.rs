use std::io;

use config::Environment;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("invalid log filter `{filter}`: {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("a global tracing subscriber is already installed: {0}")]
    Init(#[from] TryInitError),
}

/// Flushes buffered log lines when dropped.
///
/// Keep it alive until the process exits, otherwise the last lines written by the background
/// writer may be lost.
#[must_use]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global subscriber for `app_name`.
///
/// In `prod` lines are written as flattened JSON through a non-blocking stdout writer. In every
/// other environment they are human readable. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let filter = env_filter()?;

    let flusher = if Environment::load()?.is_prod() {
        let (writer, guard) = tracing_appender::non_blocking(io::stdout());
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .flatten_event(true)
            .with_writer(writer);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;

        LogFlusher {
            _guard: Some(guard),
        }
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()?;

        LogFlusher { _guard: None }
    };

    tracing::debug!(app_name, "tracing initialized");

    Ok(flusher)
}

/// Installs a test subscriber writing through the test harness capture.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

fn env_filter() -> Result<EnvFilter, TracingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(filter) if !filter.trim().is_empty() => {
            EnvFilter::try_new(&filter).map_err(|source| TracingError::Filter { filter, source })
        }
        _ => Ok(EnvFilter::new(DEFAULT_FILTER)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_can_be_initialized_twice() {
        init_test_tracing();
        init_test_tracing();
    }
}
