use futures::future::BoxFuture;
use serde_json::Value;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::RunRecorder;
use flowrun_core::types::{Outcome, RunId, StepId, ToolExecution};
use flowrun_store::MemoryRecorder;

/// Recorder operation that [`FailingRecorder`] refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateRun,
    FinishRun,
    CreateStep,
    FinishStep,
    AppendStepLog,
    RecordToolExecution,
}

/// A [`MemoryRecorder`] that fails one kind of call.
pub struct FailingRecorder {
    inner: MemoryRecorder,
    fail_at: FailPoint,
}

impl FailingRecorder {
    pub fn new(fail_at: FailPoint) -> Self {
        Self {
            inner: MemoryRecorder::new(),
            fail_at,
        }
    }

    /// Everything recorded before and around the injected failure.
    pub fn inner(&self) -> &MemoryRecorder {
        &self.inner
    }

    fn refuses(&self, point: FailPoint) -> Option<FlowError> {
        (self.fail_at == point)
            .then(|| FlowError::Recorder(format!("injected failure at {:?}", point)))
    }
}

impl RunRecorder for FailingRecorder {
    fn create_run(&self, workflow_id: &str, trigger_data: &Value) -> BoxFuture<'_, Result<RunId>> {
        if let Some(e) = self.refuses(FailPoint::CreateRun) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.create_run(workflow_id, trigger_data)
    }

    fn finish_run(&self, run_id: &RunId, outcome: Outcome) -> BoxFuture<'_, Result<()>> {
        if let Some(e) = self.refuses(FailPoint::FinishRun) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.finish_run(run_id, outcome)
    }

    fn create_step(
        &self,
        run_id: &RunId,
        node_id: &str,
        node_type: &str,
        input: &Value,
    ) -> BoxFuture<'_, Result<StepId>> {
        if let Some(e) = self.refuses(FailPoint::CreateStep) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.create_step(run_id, node_id, node_type, input)
    }

    fn finish_step(&self, step_id: &StepId, outcome: Outcome) -> BoxFuture<'_, Result<()>> {
        if let Some(e) = self.refuses(FailPoint::FinishStep) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.finish_step(step_id, outcome)
    }

    fn append_step_log(&self, step_id: &StepId, message: &str) -> BoxFuture<'_, Result<()>> {
        if let Some(e) = self.refuses(FailPoint::AppendStepLog) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.append_step_log(step_id, message)
    }

    fn record_tool_execution(&self, execution: ToolExecution) -> BoxFuture<'_, Result<()>> {
        if let Some(e) = self.refuses(FailPoint::RecordToolExecution) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.record_tool_execution(execution)
    }
}
