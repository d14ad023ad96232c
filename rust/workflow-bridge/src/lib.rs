//! Blocking execution bridge for callback-driven workflow engines.
//!
//! This crate provides:
//! - [`ExecutionBridge`]: starts one workflow run and blocks the calling thread
//!   until the engine reports a terminal outcome
//! - The engine contract ([`engine::WorkflowDefinition`], [`engine::WorkflowEngine`])
//!   and a tokio-backed engine ([`engine::runtime::TokioEngine`])
//! - A shared [`ProgressReporter`] the engine pushes progress into
//!
//! # Architecture
//!
//! The engine runs the workflow on threads it owns and reports back through
//! completed / unhandled-failure / aborted callbacks. The bridge translates
//! those callbacks into the caller's handlers:
//! - exactly one terminal path claims and opens the [`Gate`]
//! - `on_finally` runs after the gate opens, whatever opened it
//! - everything the bridge holds is released once before `run` returns
//!
//! Handler failures (returned errors and panics) are caught at the point of
//! invocation and land in the reporter's error trace or in `on_failed`;
//! `run` itself never fails.
//!
//! # Usage
//!
//! ```rust,ignore
//! use workflow_bridge::prelude::*;
//!
//! let reporter = Arc::new(ProgressReporter::new());
//!
//! let termination = ExecutionBridge::builder(definition)
//!     .parameters(parameters)
//!     .reporter(Arc::clone(&reporter))
//!     .on_completed(|outputs| {
//!         println!("result: {}", outputs["result"]);
//!         Ok(())
//!     })
//!     .on_failed(|error| eprintln!("run failed: {error}"))
//!     .on_finally(|| Ok(()))
//!     .build()
//!     .run();
//! ```

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
mod handlers;
pub mod progress;
pub mod telemetry;

// Re-exports
pub use bridge::{ExecutionBridge, ExecutionBridgeBuilder};
pub use error::{EngineError, RunError};
pub use gate::{Gate, Termination};
pub use handlers::{AbortedHandler, CompletedHandler, FailedHandler, FinallyHandler};
pub use progress::{ProgressObserver, ProgressReporter};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{AbortPolicy, BridgeConfig};
    pub use crate::engine::{
        CompletedEvent, Outputs, Parameters, UnhandledFailure, WorkflowDefinition, WorkflowEngine,
    };
    pub use crate::engine::runtime::{TokioDefinition, Workflow, WorkflowContext};
    pub use crate::error::{EngineError, RunError};
    pub use crate::gate::Termination;
    pub use crate::progress::{ProgressObserver, ProgressReporter, ProgressUpdate, RunRecord};
    pub use crate::{ExecutionBridge, ExecutionBridgeBuilder};
}
