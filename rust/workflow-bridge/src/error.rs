//! Error types for the execution bridge.
//!
//! Handler and observer failures travel as [`anyhow::Error`]; the typed enums
//! below describe what the engine and the bridge itself can report.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Failures reported by a workflow engine before or while starting.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine (or the definition) refused the start request.
    #[error("engine rejected start: {0}")]
    Rejected(#[source] anyhow::Error),

    /// `start` was called on an engine instance that already runs.
    #[error("engine instance already started")]
    AlreadyStarted,

    /// The engine instance could not be constructed for the definition.
    #[error("failed to instantiate engine: {0}")]
    Instantiate(#[source] anyhow::Error),

    /// The runtime hosting the engine is gone.
    #[error("engine runtime unavailable: {0}")]
    RuntimeUnavailable(String),
}

/// Failure delivered to the caller's `on_failed` handler.
#[derive(Debug, Error)]
pub enum RunError {
    /// The engine refused to start the workflow.
    #[error(transparent)]
    Start(#[from] EngineError),

    /// The running workflow surfaced a failure it did not handle.
    #[error("workflow failed: {error}")]
    Unhandled {
        error: anyhow::Error,
        source_activity: Option<String>,
    },

    /// The `on_finally` handler failed.
    #[error("finalizer failed: {0}")]
    Finalizer(#[source] anyhow::Error),

    /// No terminal callback arrived within the configured wait timeout.
    #[error("workflow did not reach a terminal state within {waited:?}")]
    TimedOut { waited: Duration },
}

impl RunError {
    /// Short machine-friendly label, used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Unhandled { .. } => "unhandled",
            Self::Finalizer(_) => "finalizer",
            Self::TimedOut { .. } => "timed_out",
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Render the full cause chain of an error for the progress trace.
#[must_use]
pub fn failure_trace(error: &anyhow::Error) -> String {
    format!("{error:?}")
}

/// Render a [`RunError`] together with its sources.
#[must_use]
pub fn run_error_trace(error: &RunError) -> String {
    match error {
        RunError::Unhandled { error, .. } => failure_trace(error),
        RunError::Finalizer(error) => format!("finalizer failed: {}", failure_trace(error)),
        other => {
            let mut trace = other.to_string();
            let mut source = std::error::Error::source(other);
            while let Some(cause) = source {
                trace.push_str("\n\nCaused by:\n    ");
                trace.push_str(&cause.to_string());
                source = cause.source();
            }
            trace
        }
    }
}

/// Convert a caught panic payload into an error.
pub(crate) fn panic_error(context: &str, payload: Box<dyn Any + Send>) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow::anyhow!("{context} panicked: {message}")
}
