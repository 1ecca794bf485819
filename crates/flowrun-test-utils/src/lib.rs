//! Shared fakes and fixtures for flowrun tests.

pub mod fixtures;
pub mod recorder;
pub mod tools;

pub use recorder::{FailPoint, FailingRecorder};
pub use tools::{CallLog, ScriptedTool, ToolCall};
