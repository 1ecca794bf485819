//! Workflow execution engine.
//!
//! [`WorkflowEngine`] opens a run, starts at the first trigger node and walks the
//! graph depth-first, handing each node to the [`NodeDispatcher`]. Every run and
//! step transition goes through the injected [`RunRecorder`](flowrun_core::traits::RunRecorder)
//! before traversal moves on.

pub mod context;
pub mod dispatcher;
pub mod executor;
pub mod transform;

pub use context::ExecutionContext;
pub use dispatcher::{NodeDispatcher, StepHandle};
pub use executor::WorkflowEngine;
