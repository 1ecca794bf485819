use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::types::*;

/// One external integration invoked by action and external nodes.
pub trait Tool: Send + Sync + 'static {
    /// Globally unique tool name, e.g. `email.send`.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Check parameters before any work is done.
    fn validate_params(&self, params: &Value) -> Validation;

    /// Execute with already-interpolated params.
    ///
    /// Never fails the future: provider and transport errors come back as
    /// `ToolResult { success: false, error }`, and missing configuration
    /// yields a successful result flagged `mock: true`.
    fn execute(&self, params: Value, ctx: ToolContext) -> BoxFuture<'_, ToolResult>;

    /// Whether a real backend is configured. `false` means mock mode.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Durable record of runs, steps, and tool calls.
///
/// Every call must be persisted before its future resolves; the engine does
/// not advance until it does.
pub trait RunRecorder: Send + Sync + 'static {
    /// Open a run in `running` state.
    fn create_run(&self, workflow_id: &str, trigger_data: &Value) -> BoxFuture<'_, Result<RunId>>;

    /// Move a running run to `completed` or `failed`. Terminal runs are immutable.
    fn finish_run(&self, run_id: &RunId, outcome: Outcome) -> BoxFuture<'_, Result<()>>;

    /// Open a step in `running` state with its input recorded.
    fn create_step(
        &self,
        run_id: &RunId,
        node_id: &str,
        node_type: &str,
        input: &Value,
    ) -> BoxFuture<'_, Result<StepId>>;

    fn finish_step(&self, step_id: &StepId, outcome: Outcome) -> BoxFuture<'_, Result<()>>;

    /// Append one timestamped line to a step's log.
    fn append_step_log(&self, step_id: &StepId, message: &str) -> BoxFuture<'_, Result<()>>;

    fn record_tool_execution(&self, execution: ToolExecution) -> BoxFuture<'_, Result<()>>;
}
