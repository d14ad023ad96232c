//! Tokio-backed workflow engine.
//!
//! Runs an async [`Workflow`] on a tokio runtime and fires the registered
//! callbacks from the runtime's worker threads.
//!
//! # Example
//!
//! ```rust,ignore
//! use workflow_bridge::engine::runtime::TokioDefinition;
//! use workflow_bridge::ExecutionBridge;
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let definition = TokioDefinition::new(Arc::new(MyWorkflow), runtime.handle().clone());
//!
//! ExecutionBridge::builder(definition)
//!     .on_completed(|outputs| { println!("{outputs:?}"); Ok(()) })
//!     .build()
//!     .run();
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::runtime::Handle;
use uuid::Uuid;

use super::{
    AbortedCallback, AbortedEvent, CallbackSet, CompletedCallback, CompletedEvent,
    FailureCallback, Outputs, Parameters, UnhandledFailure, WorkflowDefinition, WorkflowEngine,
};
use crate::error::EngineError;
use crate::progress::ProgressReporter;

/// Returned from [`Workflow::execute`] to abort the instance instead of failing it.
#[derive(Debug, Error)]
#[error("workflow aborted: {reason}")]
pub struct WorkflowAborted {
    pub reason: String,
}

/// Asynchronous unit of work executed by [`TokioEngine`].
#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;

    /// Synchronous admission check run by `start`. Rejecting here fails the
    /// start request before any callback can fire.
    fn validate(&self, _parameters: &Parameters) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: WorkflowContext) -> anyhow::Result<Outputs>;
}

/// Per-instance context handed to [`Workflow::execute`].
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub instance_id: Uuid,
    pub parameters: Parameters,
    progress: Option<Arc<ProgressReporter>>,
}

impl WorkflowContext {
    /// Deserialize a parameter into `T`.
    pub fn parameter<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .parameters
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("missing parameter: {key}"))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("invalid parameter {key}: {e}"))
    }

    /// Push a progress update to the registered reporter, if any.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        if let Some(progress) = &self.progress {
            progress.report(percent, Some(message.into()));
        }
    }

    /// Build the error that aborts this instance when returned from `execute`.
    #[must_use]
    pub fn abort(&self, reason: impl Into<String>) -> anyhow::Error {
        WorkflowAborted {
            reason: reason.into(),
        }
        .into()
    }
}

/// Definition that runs a [`Workflow`] on a tokio runtime.
#[derive(Clone)]
pub struct TokioDefinition {
    workflow: Arc<dyn Workflow>,
    handle: Handle,
}

impl TokioDefinition {
    #[must_use]
    pub fn new(workflow: Arc<dyn Workflow>, handle: Handle) -> Self {
        Self { workflow, handle }
    }
}

impl fmt::Debug for TokioDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioDefinition")
            .field("workflow", &self.workflow.name())
            .finish_non_exhaustive()
    }
}

impl WorkflowDefinition for TokioDefinition {
    type Engine = TokioEngine;

    fn name(&self) -> &str {
        self.workflow.name()
    }

    fn instantiate(&self, parameters: Parameters) -> Result<TokioEngine, EngineError> {
        Ok(TokioEngine {
            instance_id: Uuid::new_v4(),
            workflow: Arc::clone(&self.workflow),
            handle: self.handle.clone(),
            parameters,
            progress: None,
            callbacks: CallbackSet::default(),
            started: false,
        })
    }
}

/// Engine instance spawned on a tokio runtime.
pub struct TokioEngine {
    instance_id: Uuid,
    workflow: Arc<dyn Workflow>,
    handle: Handle,
    parameters: Parameters,
    progress: Option<Arc<ProgressReporter>>,
    callbacks: CallbackSet,
    started: bool,
}

impl fmt::Debug for TokioEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioEngine")
            .field("instance_id", &self.instance_id)
            .field("workflow", &self.workflow.name())
            .field("callbacks", &self.callbacks)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl TokioEngine {
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}

impl WorkflowEngine for TokioEngine {
    fn register_progress(&mut self, reporter: Arc<ProgressReporter>) {
        self.progress = Some(reporter);
    }

    fn on_completed(&mut self, callback: CompletedCallback) {
        self.callbacks.completed = Some(callback);
    }

    fn on_unhandled_failure(&mut self, callback: FailureCallback) {
        self.callbacks.failed = Some(callback);
    }

    fn on_aborted(&mut self, callback: AbortedCallback) {
        self.callbacks.aborted = Some(callback);
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        self.workflow
            .validate(&self.parameters)
            .map_err(EngineError::Rejected)?;
        if self.handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
            // The caller blocks on the gate, so a current-thread runtime
            // would never get to poll the workflow.
            return Err(EngineError::RuntimeUnavailable(
                "current-thread runtime cannot run a blocking bridge".to_string(),
            ));
        }
        self.started = true;

        let ctx = WorkflowContext {
            instance_id: self.instance_id,
            parameters: std::mem::take(&mut self.parameters),
            progress: self.progress.clone(),
        };
        let workflow = Arc::clone(&self.workflow);
        let mut callbacks = std::mem::take(&mut self.callbacks);
        let instance_id = self.instance_id;

        tracing::debug!(%instance_id, workflow = workflow.name(), "spawning workflow instance");

        let handle = self.handle.clone();
        self.handle.spawn(async move {
            // Run the body in its own task so a panic surfaces as a JoinError.
            let body = handle.spawn(async move { workflow.execute(ctx).await });
            let outcome = match body.await {
                Ok(result) => result,
                Err(join_error) if join_error.is_panic() => Err(crate::error::panic_error(
                    "workflow",
                    join_error.into_panic(),
                )),
                Err(join_error) => Err(anyhow::anyhow!("workflow task cancelled: {join_error}")),
            };

            match outcome {
                Ok(outputs) => {
                    tracing::debug!(%instance_id, "workflow instance completed");
                    callbacks.complete(CompletedEvent { outputs });
                }
                Err(error) => match error.downcast::<WorkflowAborted>() {
                    Ok(aborted) => {
                        tracing::debug!(%instance_id, reason = %aborted.reason, "workflow instance aborted");
                        callbacks.abort(AbortedEvent {
                            reason: aborted.into(),
                        });
                    }
                    Err(error) => {
                        tracing::debug!(%instance_id, "workflow instance failed: {error:#}");
                        let action = callbacks.fail(UnhandledFailure::new(error));
                        tracing::debug!(%instance_id, ?action, "unhandled failure answered");
                    }
                },
            }
        });

        Ok(())
    }
}
