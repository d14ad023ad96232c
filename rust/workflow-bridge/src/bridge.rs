//! Blocking execution bridge.
//!
//! [`ExecutionBridge::run`] starts a workflow on an engine that reports back
//! through callbacks on its own threads, parks the calling thread on a
//! [`Gate`] until a terminal callback opens it, runs the finalizer and
//! disposes of everything the bridge holds.
//!
//! # Terminal paths
//!
//! | Event                  | Trace | `terminated_date` | Handler        | Gate          |
//! |------------------------|-------|-------------------|----------------|---------------|
//! | start rejected         | yes   | yes               | `on_failed`    | set           |
//! | completed              | on handler failure | yes  | `on_completed` | set           |
//! | unhandled failure      | yes   | yes               | `on_failed`    | set           |
//! | aborted (`Notify`)     | no    | no                | `on_aborted`   | untouched     |
//! | aborted (`Release`)    | yes   | yes               | `on_aborted`   | set           |
//!
//! `on_finally` runs once after the gate is set, whichever path set it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{AbortPolicy, BridgeConfig};
use crate::engine::{
    AbortedEvent, CompletedEvent, Outputs, Parameters, UnhandledFailure, UnhandledFailureAction,
    WorkflowDefinition, WorkflowEngine,
};
use crate::error::{EngineError, RunError, failure_trace, run_error_trace};
use crate::gate::{Gate, Termination};
use crate::handlers::{
    AbortedHandler, CompletedHandler, FailedHandler, FinallyHandler, Handlers, guarded,
};
use crate::progress::ProgressReporter;

/// State shared between the waiting caller and the engine's callback threads.
struct RunContext {
    gate: Gate,
    reporter: Arc<ProgressReporter>,
    handlers: Handlers,
    abort_policy: AbortPolicy,
}

impl RunContext {
    /// The engine refused to start: record, report and release the caller.
    fn fail_start(&self, error: EngineError) {
        if !self.gate.claim(Termination::StartFailed) {
            tracing::warn!("start failure after the run already terminated: {error}");
            return;
        }
        let error = RunError::Start(error);
        tracing::info!(termination = %Termination::StartFailed, "workflow start rejected: {error}");

        self.reporter.set_error_stack(run_error_trace(&error));
        self.reporter.set_terminated_date(Utc::now());
        self.handlers.failed(&error);
        self.gate.open();
    }

    fn complete(&self, event: CompletedEvent) {
        if !self.gate.claim(Termination::Completed) {
            tracing::warn!("completion arrived after the run terminated; ignoring");
            return;
        }

        let mut failures = Vec::new();
        if let Err(e) = guarded("on_finish", || self.reporter.on_finish()) {
            failures.push(e);
        }
        if let Some(handler) = self.handlers.take_completed() {
            let outputs: Outputs = event.outputs.into_iter().collect();
            if let Err(e) = guarded("on_completed", || handler(outputs)) {
                failures.push(e);
            }
        }
        if !failures.is_empty() {
            let trace = failures
                .iter()
                .map(failure_trace)
                .collect::<Vec<_>>()
                .join("\n\n");
            tracing::warn!(failures = failures.len(), "completion handling failed");
            self.reporter.set_error_stack(trace);
        }

        self.reporter.set_terminated_date(Utc::now());
        tracing::info!(termination = %Termination::Completed, "workflow completed");
        self.gate.open();
    }

    fn fail(&self, failure: UnhandledFailure) -> UnhandledFailureAction {
        if !self.gate.claim(Termination::Failed) {
            tracing::warn!("unhandled failure after the run terminated: {:#}", failure.error);
            return UnhandledFailureAction::Terminate;
        }

        self.reporter.set_error_stack(failure_trace(&failure.error));
        self.reporter.set_terminated_date(Utc::now());
        tracing::info!(
            termination = %Termination::Failed,
            source_activity = failure.source_activity.as_deref(),
            "workflow failed: {:#}",
            failure.error
        );

        let error = RunError::Unhandled {
            error: failure.error,
            source_activity: failure.source_activity,
        };
        self.handlers.failed(&error);
        self.gate.open();
        UnhandledFailureAction::Terminate
    }

    fn abort(&self, event: AbortedEvent) {
        tracing::info!(policy = ?self.abort_policy, "workflow aborted: {:#}", event.reason);

        if let Some(handler) = self.handlers.take_aborted() {
            let outcome = guarded("on_aborted", || {
                handler();
                Ok(())
            });
            if let Err(e) = outcome {
                tracing::warn!("{e:#}");
            }
        }

        if self.abort_policy == AbortPolicy::Release && self.gate.claim(Termination::Aborted) {
            self.reporter.set_error_stack(failure_trace(&event.reason));
            self.reporter.set_terminated_date(Utc::now());
            self.gate.open();
        }
    }

    /// Park until a terminal path opens the gate or `timeout` elapses.
    fn wait(&self, timeout: Option<Duration>) -> Termination {
        let Some(timeout) = timeout else {
            return self.gate.wait();
        };
        if let Some(termination) = self.gate.wait_timeout(timeout) {
            return termination;
        }
        if !self.gate.claim(Termination::TimedOut) {
            // A terminal callback is mid-flight; let it finish.
            return self.gate.wait();
        }

        let error = RunError::TimedOut { waited: timeout };
        tracing::warn!(termination = %Termination::TimedOut, "{error}");
        self.reporter.set_error_stack(run_error_trace(&error));
        self.reporter.set_terminated_date(Utc::now());
        self.handlers.failed(&error);
        self.gate.open();
        Termination::TimedOut
    }

    fn finalize(&self) {
        let Some(handler) = self.handlers.take_finally() else {
            return;
        };
        if let Err(e) = guarded("on_finally", handler) {
            tracing::warn!("finalizer failed: {e:#}");
            self.handlers.failed(&RunError::Finalizer(e));
        }
    }
}

/// Drives one workflow run to a terminal state on the calling thread.
///
/// Single use: [`run`](Self::run) consumes the bridge.
pub struct ExecutionBridge<D: WorkflowDefinition> {
    run_id: Uuid,
    definition: Option<D>,
    parameters: Option<Parameters>,
    context: Option<Arc<RunContext>>,
    config: BridgeConfig,
    disposed: bool,
}

impl<D: WorkflowDefinition> fmt::Debug for ExecutionBridge<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionBridge")
            .field("run_id", &self.run_id)
            .field("workflow", &self.definition.as_ref().map(WorkflowDefinition::name))
            .field("parameters", &self.parameters.as_ref().map(Parameters::len))
            .field("handlers", &self.context.as_ref().map(|ctx| &ctx.handlers))
            .field("config", &self.config)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl<D: WorkflowDefinition> ExecutionBridge<D> {
    pub fn builder(definition: D) -> ExecutionBridgeBuilder<D> {
        ExecutionBridgeBuilder::new(definition)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The reporter shared with the engine, until disposal.
    pub fn reporter(&self) -> Option<&Arc<ProgressReporter>> {
        self.context.as_ref().map(|ctx| &ctx.reporter)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Start the workflow and block until it reaches a terminal state.
    ///
    /// Never panics on behalf of the engine or the handlers; outcomes are
    /// delivered through the registered handlers and the progress reporter.
    pub fn run(mut self) -> Termination {
        let span = tracing::info_span!(
            "workflow_run",
            run_id = %self.run_id,
            workflow = tracing::field::Empty
        );
        let _entered = span.enter();

        let (Some(definition), Some(ctx)) = (self.definition.as_ref(), self.context.clone()) else {
            tracing::warn!("run called on a disposed execution bridge");
            return Termination::StartFailed;
        };
        span.record("workflow", definition.name());

        let parameters = self.parameters.take().unwrap_or_default();
        let termination = {
            let engine = match Self::start(definition, parameters, &ctx) {
                Ok(engine) => {
                    ctx.reporter.set_start_date(Utc::now());
                    if let Err(e) = guarded("on_start", || ctx.reporter.on_start()) {
                        tracing::warn!("start notification failed: {e:#}");
                    }
                    tracing::info!("workflow started");
                    Some(engine)
                }
                Err(error) => {
                    ctx.fail_start(error);
                    None
                }
            };

            let termination = ctx.wait(self.config.wait_timeout());
            drop(engine);
            termination
        };

        ctx.finalize();
        self.dispose();
        termination
    }

    fn start(
        definition: &D,
        parameters: Parameters,
        ctx: &Arc<RunContext>,
    ) -> Result<D::Engine, EngineError> {
        let attempt = guarded("engine start", || {
            let mut engine = definition.instantiate(parameters)?;
            engine.register_progress(Arc::clone(&ctx.reporter));

            let completed = Arc::clone(ctx);
            engine.on_completed(Box::new(move |event| completed.complete(event)));
            let failed = Arc::clone(ctx);
            engine.on_unhandled_failure(Box::new(move |failure| failed.fail(failure)));
            let aborted = Arc::clone(ctx);
            engine.on_aborted(Box::new(move |event| aborted.abort(event)));

            engine.start()?;
            Ok(engine)
        });

        match attempt {
            Ok(engine) => Ok(engine),
            Err(error) => match error.downcast::<EngineError>() {
                Ok(engine_error) => Err(engine_error),
                Err(panic) => Err(EngineError::Rejected(panic)),
            },
        }
    }

    /// Release the definition, parameters and handlers.
    ///
    /// Idempotent. Called by [`run`](Self::run) and on drop.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.definition = None;
        self.parameters = None;
        if let Some(ctx) = self.context.take() {
            ctx.handlers.clear();
        }
        tracing::debug!(run_id = %self.run_id, "execution bridge disposed");
    }
}

impl<D: WorkflowDefinition> Drop for ExecutionBridge<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Builder for [`ExecutionBridge`].
pub struct ExecutionBridgeBuilder<D: WorkflowDefinition> {
    definition: D,
    parameters: Option<Parameters>,
    reporter: Option<Arc<ProgressReporter>>,
    on_completed: Option<CompletedHandler>,
    on_failed: Option<FailedHandler>,
    on_finally: Option<FinallyHandler>,
    on_aborted: Option<AbortedHandler>,
    config: BridgeConfig,
}

impl<D: WorkflowDefinition> fmt::Debug for ExecutionBridgeBuilder<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionBridgeBuilder")
            .field("workflow", &self.definition.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<D: WorkflowDefinition> ExecutionBridgeBuilder<D> {
    pub fn new(definition: D) -> Self {
        Self {
            definition,
            parameters: None,
            reporter: None,
            on_completed: None,
            on_failed: None,
            on_finally: None,
            on_aborted: None,
            config: BridgeConfig::default(),
        }
    }

    /// Input parameters. An empty map is used when none are given.
    #[must_use]
    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Reporter shared with the engine. A fresh one is created when none is given.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    #[must_use]
    pub fn on_completed<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Outputs) -> anyhow::Result<()> + Send + 'static,
    {
        self.on_completed = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_failed<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&RunError) + Send + 'static,
    {
        self.on_failed = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_finally<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.on_finally = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_aborted<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_aborted = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ExecutionBridge<D> {
        let context = RunContext {
            gate: Gate::new(),
            reporter: self.reporter.unwrap_or_default(),
            handlers: Handlers::new(
                self.on_completed,
                self.on_failed,
                self.on_finally,
                self.on_aborted,
            ),
            abort_policy: self.config.abort_policy,
        };

        ExecutionBridge {
            run_id: Uuid::new_v4(),
            definition: Some(self.definition),
            parameters: self.parameters,
            context: Some(Arc::new(context)),
            config: self.config,
            disposed: false,
        }
    }
}
