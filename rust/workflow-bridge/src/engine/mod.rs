//! Engine contract consumed by the bridge.
//!
//! An engine runs a workflow definition asynchronously on threads it owns and
//! reports the outcome through callbacks registered before `start`. The
//! bridge never looks inside the definition; it only drives one instance to
//! a terminal state.

pub mod runtime;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::progress::ProgressReporter;

/// Input parameters handed to the engine at start.
pub type Parameters = HashMap<String, serde_json::Value>;

/// Output values produced by a completed workflow.
pub type Outputs = HashMap<String, serde_json::Value>;

/// Normal completion of a workflow instance.
#[derive(Debug, Clone, Default)]
pub struct CompletedEvent {
    /// Declared outputs, keyed by output name.
    pub outputs: Outputs,
}

/// A failure the running workflow did not handle.
#[derive(Debug)]
pub struct UnhandledFailure {
    /// The failure raised by the workflow.
    pub error: anyhow::Error,
    /// Name of the activity that raised it, when the engine knows.
    pub source_activity: Option<String>,
}

impl UnhandledFailure {
    #[must_use]
    pub fn new(error: anyhow::Error) -> Self {
        Self {
            error,
            source_activity: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, activity: impl Into<String>) -> Self {
        self.source_activity = Some(activity.into());
        self
    }
}

/// The engine aborted the instance.
#[derive(Debug)]
pub struct AbortedEvent {
    pub reason: anyhow::Error,
}

/// What the engine should do with an instance after an unhandled failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhandledFailureAction {
    /// Stop the instance; no further callbacks fire.
    Terminate,
    /// Abort the instance; the aborted callback fires next.
    Abort,
}

pub type CompletedCallback = Box<dyn FnOnce(CompletedEvent) + Send + 'static>;
pub type FailureCallback =
    Box<dyn FnOnce(UnhandledFailure) -> UnhandledFailureAction + Send + 'static>;
pub type AbortedCallback = Box<dyn FnOnce(AbortedEvent) + Send + 'static>;

/// A unit of work the bridge can execute.
pub trait WorkflowDefinition: Send {
    type Engine: WorkflowEngine;

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Build an engine instance bound to this definition and `parameters`.
    fn instantiate(&self, parameters: Parameters) -> Result<Self::Engine, EngineError>;
}

/// One engine instance executing one workflow run.
///
/// Engines guarantee that at most one of {completed, unhandled failure}
/// fires per instance. Callbacks may run on any thread.
pub trait WorkflowEngine: Send {
    /// Make `reporter` visible to the running workflow.
    fn register_progress(&mut self, reporter: Arc<ProgressReporter>);

    fn on_completed(&mut self, callback: CompletedCallback);

    fn on_unhandled_failure(&mut self, callback: FailureCallback);

    fn on_aborted(&mut self, callback: AbortedCallback);

    /// Begin asynchronous execution.
    ///
    /// An error means the engine refused the request and no callback will fire.
    fn start(&mut self) -> Result<(), EngineError>;
}

/// Registered terminal callbacks, taken out by the engine when it fires them.
#[derive(Default)]
pub struct CallbackSet {
    pub completed: Option<CompletedCallback>,
    pub failed: Option<FailureCallback>,
    pub aborted: Option<AbortedCallback>,
}

impl CallbackSet {
    /// Fire the completed callback, if one is registered.
    pub fn complete(&mut self, event: CompletedEvent) {
        if let Some(callback) = self.completed.take() {
            callback(event);
        }
    }

    /// Fire the unhandled-failure callback, then the aborted callback when
    /// the answer asks for it. Without a failure callback the instance terminates.
    pub fn fail(&mut self, failure: UnhandledFailure) -> UnhandledFailureAction {
        let reason = anyhow::anyhow!("{:#}", failure.error);
        let action = match self.failed.take() {
            Some(callback) => callback(failure),
            None => UnhandledFailureAction::Terminate,
        };
        if action == UnhandledFailureAction::Abort {
            self.abort(AbortedEvent { reason });
        }
        action
    }

    /// Fire the aborted callback, if one is registered.
    pub fn abort(&mut self, event: AbortedEvent) {
        if let Some(callback) = self.aborted.take() {
            callback(event);
        }
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("completed", &self.completed.is_some())
            .field("failed", &self.failed.is_some())
            .field("aborted", &self.aborted.is_some())
            .finish()
    }
}
