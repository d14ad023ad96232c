//! Progress reporting shared between the bridge and the engine.
//!
//! A [`ProgressReporter`] is registered with the engine as an extension so the
//! running workflow can push progress into it. The bridge writes the run's
//! timestamps and failure trace into the same reporter while translating
//! terminal events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// A single progress notification pushed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Completion percentage (0-100).
    pub percent: u8,
    /// Optional human-readable status line.
    pub message: Option<String>,
    /// When the update was recorded.
    pub at: DateTime<Utc>,
}

/// Receives lifecycle notifications for a run.
///
/// All methods default to no-ops. Returned errors are caught by the caller
/// and never propagate into the engine.
pub trait ProgressObserver: Send + Sync {
    /// The engine accepted the start request.
    fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// The workflow pushed a progress update.
    fn on_progress(&self, _update: &ProgressUpdate) -> anyhow::Result<()> {
        Ok(())
    }

    /// The workflow completed normally.
    fn on_finish(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Snapshot of everything recorded for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub start_date: Option<DateTime<Utc>>,
    pub terminated_date: Option<DateTime<Utc>>,
    pub error_stack: Option<String>,
    pub percent: u8,
    pub message: Option<String>,
    pub updates: u64,
}

/// Shared progress state for one run.
#[derive(Default)]
pub struct ProgressReporter {
    record: RwLock<RunRecord>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("record", &*self.record.read())
            .field("observer", &self.observer.as_ref().map(|_| "<dyn ProgressObserver>"))
            .finish()
    }
}

impl ProgressReporter {
    /// Create a reporter that only records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reporter that forwards notifications to `observer`.
    #[must_use]
    pub fn with_observer(observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            record: RwLock::new(RunRecord::default()),
            observer: Some(observer),
        }
    }

    pub fn on_start(&self) -> anyhow::Result<()> {
        match &self.observer {
            Some(observer) => observer.on_start(),
            None => Ok(()),
        }
    }

    pub fn on_finish(&self) -> anyhow::Result<()> {
        match &self.observer {
            Some(observer) => observer.on_finish(),
            None => Ok(()),
        }
    }

    /// Record a progress update pushed by the engine.
    ///
    /// The percentage is clamped to 100. Observer failures are logged and
    /// dropped so that progress reporting never fails the workflow.
    pub fn report(&self, percent: u8, message: Option<String>) {
        let update = ProgressUpdate {
            percent: percent.min(100),
            message,
            at: Utc::now(),
        };

        {
            let mut record = self.record.write();
            record.percent = update.percent;
            record.message.clone_from(&update.message);
            record.updates += 1;
        }

        if let Some(observer) = &self.observer {
            if let Err(e) = observer.on_progress(&update) {
                tracing::warn!(percent = update.percent, "progress observer failed: {e:#}");
            }
        }
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.record.read().start_date
    }

    pub fn set_start_date(&self, at: DateTime<Utc>) {
        self.record.write().start_date = Some(at);
    }

    pub fn terminated_date(&self) -> Option<DateTime<Utc>> {
        self.record.read().terminated_date
    }

    pub fn set_terminated_date(&self, at: DateTime<Utc>) {
        self.record.write().terminated_date = Some(at);
    }

    pub fn error_stack(&self) -> Option<String> {
        self.record.read().error_stack.clone()
    }

    pub fn set_error_stack(&self, trace: impl Into<String>) {
        self.record.write().error_stack = Some(trace.into());
    }

    /// Last reported percentage.
    pub fn percent(&self) -> u8 {
        self.record.read().percent
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> RunRecord {
        self.record.read().clone()
    }

    /// Wall-clock time between start and termination, once both are known.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let record = self.record.read();
        match (record.start_date, record.terminated_date) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
