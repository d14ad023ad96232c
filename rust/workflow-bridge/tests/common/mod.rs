//! Shared helpers for bridge integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use workflow_bridge::engine::{
    AbortedEvent, AbortedCallback, CallbackSet, CompletedCallback, CompletedEvent,
    FailureCallback, Outputs, Parameters, UnhandledFailure, UnhandledFailureAction,
    WorkflowDefinition, WorkflowEngine,
};
use workflow_bridge::{EngineError, ExecutionBridgeBuilder, ProgressReporter};

/// What the scripted engine does once started.
#[derive(Debug, Clone)]
pub enum Script {
    /// Fire the completed callback with these outputs.
    Complete(Outputs),
    /// Fire the unhandled-failure callback.
    Fail(String),
    /// Fire only the aborted callback.
    Abort(String),
    /// Fire the aborted callback, then the unhandled-failure callback.
    AbortThenFail(String),
    /// Refuse the start request.
    RejectStart(String),
    /// Panic inside `start`.
    PanicOnStart,
    /// Never call back.
    Silent,
}

/// Observations made by the scripted engine.
#[derive(Debug, Default)]
pub struct EngineLog {
    pub received_parameters: Mutex<Option<Parameters>>,
    pub callback_threads: Mutex<Vec<ThreadId>>,
    pub answers: Mutex<Vec<UnhandledFailureAction>>,
    pub instances: Mutex<u32>,
}

/// Definition whose engine follows a [`Script`] on a spawned thread.
#[derive(Debug, Clone)]
pub struct ScriptedDefinition {
    pub script: Script,
    pub delay: Duration,
    pub log: Arc<EngineLog>,
}

impl ScriptedDefinition {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            delay: Duration::from_millis(20),
            log: Arc::new(EngineLog::default()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl WorkflowDefinition for ScriptedDefinition {
    type Engine = ScriptedEngine;

    fn name(&self) -> &str {
        "scripted"
    }

    fn instantiate(&self, parameters: Parameters) -> Result<ScriptedEngine, EngineError> {
        *self.log.instances.lock() += 1;
        *self.log.received_parameters.lock() = Some(parameters);
        Ok(ScriptedEngine {
            script: self.script.clone(),
            delay: self.delay,
            log: Arc::clone(&self.log),
            progress: None,
            callbacks: CallbackSet::default(),
        })
    }
}

#[derive(Debug)]
pub struct ScriptedEngine {
    script: Script,
    delay: Duration,
    log: Arc<EngineLog>,
    progress: Option<Arc<ProgressReporter>>,
    callbacks: CallbackSet,
}

impl WorkflowEngine for ScriptedEngine {
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
        match &self.script {
            Script::RejectStart(reason) => {
                return Err(EngineError::Rejected(anyhow::anyhow!("{reason}")));
            }
            Script::PanicOnStart => panic!("engine exploded during start"),
            Script::Silent => return Ok(()),
            _ => {}
        }

        let script = self.script.clone();
        let delay = self.delay;
        let log = Arc::clone(&self.log);
        let progress = self.progress.clone();
        let mut callbacks = std::mem::take(&mut self.callbacks);

        thread::spawn(move || {
            thread::sleep(delay);
            if let Some(progress) = &progress {
                progress.report(50, Some("halfway".to_string()));
            }
            log.callback_threads.lock().push(thread::current().id());

            match script {
                Script::Complete(outputs) => callbacks.complete(CompletedEvent { outputs }),
                Script::Fail(message) => {
                    let failure =
                        UnhandledFailure::new(anyhow::anyhow!("{message}")).with_source("step-2");
                    let answer = callbacks.fail(failure);
                    log.answers.lock().push(answer);
                }
                Script::Abort(reason) => callbacks.abort(AbortedEvent {
                    reason: anyhow::anyhow!("{reason}"),
                }),
                Script::AbortThenFail(reason) => {
                    callbacks.abort(AbortedEvent {
                        reason: anyhow::anyhow!("{reason}"),
                    });
                    let answer = callbacks.fail(UnhandledFailure::new(anyhow::anyhow!(
                        "instance aborted: {reason}"
                    )));
                    log.answers.lock().push(answer);
                }
                Script::RejectStart(_) | Script::PanicOnStart | Script::Silent => {}
            }
        });

        Ok(())
    }
}

/// Ordered record of handler invocations.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Builder with all four handlers recording into `calls`.
pub fn recording_builder(
    definition: ScriptedDefinition,
    calls: &Calls,
) -> ExecutionBridgeBuilder<ScriptedDefinition> {
    let completed = calls.clone();
    let failed = calls.clone();
    let finally = calls.clone();
    let aborted = calls.clone();

    workflow_bridge::ExecutionBridge::builder(definition)
        .on_completed(move |outputs| {
            let mut keys: Vec<_> = outputs.keys().cloned().collect();
            keys.sort();
            completed.push(format!("completed:{}", keys.join(",")));
            Ok(())
        })
        .on_failed(move |error| failed.push(format!("failed:{}", error.kind())))
        .on_finally(move || {
            finally.push("finally");
            Ok(())
        })
        .on_aborted(move || aborted.push("aborted"))
}

pub fn outputs(pairs: &[(&str, serde_json::Value)]) -> Outputs {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
