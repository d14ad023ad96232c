//! Caller-supplied outcome handlers and the failure boundary that wraps them.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;

use crate::engine::Outputs;
use crate::error::{RunError, panic_error};

pub type CompletedHandler = Box<dyn FnOnce(Outputs) -> anyhow::Result<()> + Send + 'static>;
pub type FailedHandler = Box<dyn FnMut(&RunError) + Send + 'static>;
pub type FinallyHandler = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;
pub type AbortedHandler = Box<dyn FnOnce() + Send + 'static>;

/// Run `f`, turning a panic into an error tagged with `context`.
pub(crate) fn guarded<T>(context: &str, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(panic_error(context, payload)),
    }
}

/// Handler slots for one run.
///
/// `on_completed`, `on_finally` and `on_aborted` are taken out of their slot
/// when invoked, so each runs at most once. `on_failed` stays in place
/// because a run has two sites that may report a failure.
#[derive(Default)]
pub(crate) struct Handlers {
    completed: Mutex<Option<CompletedHandler>>,
    failed: Mutex<Option<FailedHandler>>,
    finally: Mutex<Option<FinallyHandler>>,
    aborted: Mutex<Option<AbortedHandler>>,
}

impl Handlers {
    pub(crate) fn new(
        completed: Option<CompletedHandler>,
        failed: Option<FailedHandler>,
        finally: Option<FinallyHandler>,
        aborted: Option<AbortedHandler>,
    ) -> Self {
        Self {
            completed: Mutex::new(completed),
            failed: Mutex::new(failed),
            finally: Mutex::new(finally),
            aborted: Mutex::new(aborted),
        }
    }

    pub(crate) fn take_completed(&self) -> Option<CompletedHandler> {
        self.completed.lock().take()
    }

    pub(crate) fn take_finally(&self) -> Option<FinallyHandler> {
        self.finally.lock().take()
    }

    pub(crate) fn take_aborted(&self) -> Option<AbortedHandler> {
        self.aborted.lock().take()
    }

    /// Invoke `on_failed` if present. A panic inside the handler is logged
    /// and swallowed.
    pub(crate) fn failed(&self, error: &RunError) {
        let mut slot = self.failed.lock();
        let Some(handler) = slot.as_mut() else {
            return;
        };
        let outcome = guarded("on_failed", || {
            handler(error);
            Ok(())
        });
        if let Err(e) = outcome {
            tracing::warn!(error_kind = error.kind(), "{e:#}");
        }
    }

    /// Drop every handler. Later invocations become no-ops.
    pub(crate) fn clear(&self) {
        self.completed.lock().take();
        self.failed.lock().take();
        self.finally.lock().take();
        self.aborted.lock().take();
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_completed", &self.completed.lock().is_some())
            .field("on_failed", &self.failed.lock().is_some())
            .field("on_finally", &self.finally.lock().is_some())
            .field("on_aborted", &self.aborted.lock().is_some())
            .finish()
    }
}
