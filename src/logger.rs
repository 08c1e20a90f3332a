//! Logger contract consumed by the orchestration layer, plus a `tracing`
//! adapter and subscriber setup for the binary.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt as fmt_layer};

/// Tag attached to every operator-facing message.
pub const LOG_TAG: &str = "bbr";

/// Leveled, tagged logging sink.
///
/// The exact message text is operator-facing, so implementations must pass
/// it through unchanged.
pub trait Logger: Send + Sync + fmt::Debug {
    /// Records a diagnostic message.
    fn debug(&self, tag: &str, message: &str);
    /// Records a progress message.
    fn info(&self, tag: &str, message: &str);
    /// Records a failure summary.
    fn error(&self, tag: &str, message: &str);
}

/// Logger shared between the jobs of one instance.
pub type SharedLogger = Arc<dyn Logger>;

/// [`Logger`] that forwards to the global `tracing` dispatcher.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl TracingLogger {
    /// Returns the adapter wrapped for sharing.
    #[must_use]
    pub fn shared() -> SharedLogger {
        Arc::new(Self)
    }
}

impl Logger for TracingLogger {
    fn debug(&self, tag: &str, message: &str) {
        tracing::debug!(tag = %tag, "{message}");
    }

    fn info(&self, tag: &str, message: &str) {
        tracing::info!(tag = %tag, "{message}");
    }

    fn error(&self, tag: &str, message: &str) {
        tracing::error!(tag = %tag, "{message}");
    }
}

/// Raised when the global subscriber cannot be installed.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    /// The level directive did not parse.
    #[error("invalid log level {level:?}: {message}")]
    InvalidLevel {
        /// Directive that failed to parse.
        level: String,
        /// Parser error text.
        message: String,
    },
    /// A global subscriber was already set.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Installs a stderr fmt subscriber. `RUST_LOG` takes precedence over
/// `level` when set.
///
/// # Errors
///
/// Returns [`LoggerInitError`] when `level` is not a valid filter directive
/// or a subscriber is already installed.
pub fn init_tracing(level: &str) -> Result<(), LoggerInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| LoggerInitError::InvalidLevel {
            level: level.to_owned(),
            message: err.to_string(),
        })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| LoggerInitError::Install(err.to_string()))
}
