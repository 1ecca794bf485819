use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::RunRecorder;
use flowrun_core::types::{Outcome, Run, RunId, RunStatus, Step, StepId, StepLog, ToolExecution};

#[derive(Default)]
struct State {
    runs: Vec<Run>,
    steps: Vec<Step>,
    tool_executions: Vec<ToolExecution>,
}

/// In-process recorder with the same contract as [`crate::SqliteRecorder`].
/// Nothing survives the process.
#[derive(Default)]
pub struct MemoryRecorder {
    state: Mutex<State>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| FlowError::Recorder(e.to_string()))
    }

    pub fn get_run(&self, run_id: &RunId) -> Result<Option<Run>> {
        Ok(self.lock()?.runs.iter().find(|r| &r.id == run_id).cloned())
    }

    /// All runs, oldest first.
    pub fn runs(&self) -> Result<Vec<Run>> {
        Ok(self.lock()?.runs.clone())
    }

    pub fn steps_for_run(&self, run_id: &RunId) -> Result<Vec<Step>> {
        Ok(self
            .lock()?
            .steps
            .iter()
            .filter(|s| &s.run_id == run_id)
            .cloned()
            .collect())
    }

    pub fn tool_executions_for_run(&self, run_id: &RunId) -> Result<Vec<ToolExecution>> {
        Ok(self
            .lock()?
            .tool_executions
            .iter()
            .filter(|t| &t.run_id == run_id)
            .cloned()
            .collect())
    }
}

impl RunRecorder for MemoryRecorder {
    fn create_run(&self, workflow_id: &str, trigger_data: &Value) -> BoxFuture<'_, Result<RunId>> {
        let run = Run {
            id: RunId::new(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Running,
            trigger_data: trigger_data.clone(),
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };

        Box::pin(async move {
            let id = run.id.clone();
            self.lock()?.runs.push(run);
            Ok(id)
        })
    }

    fn finish_run(&self, run_id: &RunId, outcome: Outcome) -> BoxFuture<'_, Result<()>> {
        let run_id = run_id.clone();

        Box::pin(async move {
            let mut state = self.lock()?;
            let run = state
                .runs
                .iter_mut()
                .find(|r| r.id == run_id)
                .ok_or_else(|| FlowError::Recorder(format!("run not found: {}", run_id)))?;
            if run.status.is_terminal() {
                return Err(FlowError::Recorder(format!(
                    "run {} is already {}",
                    run_id, run.status
                )));
            }
            run.status = outcome.status();
            match outcome {
                Outcome::Completed(value) => run.result = Some(value),
                Outcome::Failed(message) => run.error = Some(message),
            }
            run.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    fn create_step(
        &self,
        run_id: &RunId,
        node_id: &str,
        node_type: &str,
        input: &Value,
    ) -> BoxFuture<'_, Result<StepId>> {
        let step = Step {
            id: StepId::new(),
            run_id: run_id.clone(),
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status: RunStatus::Running,
            input: input.clone(),
            output: None,
            error: None,
            logs: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        };

        Box::pin(async move {
            let id = step.id.clone();
            self.lock()?.steps.push(step);
            Ok(id)
        })
    }

    fn finish_step(&self, step_id: &StepId, outcome: Outcome) -> BoxFuture<'_, Result<()>> {
        let step_id = step_id.clone();

        Box::pin(async move {
            let mut state = self.lock()?;
            let step = find_step(&mut state, &step_id)?;
            if step.status.is_terminal() {
                return Err(FlowError::Recorder(format!(
                    "step {} is already {}",
                    step_id, step.status
                )));
            }
            step.status = outcome.status();
            match outcome {
                Outcome::Completed(value) => step.output = Some(value),
                Outcome::Failed(message) => step.error = Some(message),
            }
            step.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    fn append_step_log(&self, step_id: &StepId, message: &str) -> BoxFuture<'_, Result<()>> {
        let step_id = step_id.clone();
        let entry = StepLog::now(message);

        Box::pin(async move {
            let mut state = self.lock()?;
            find_step(&mut state, &step_id)?.logs.push(entry);
            Ok(())
        })
    }

    fn record_tool_execution(&self, execution: ToolExecution) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.lock()?.tool_executions.push(execution);
            Ok(())
        })
    }
}

fn find_step<'a>(state: &'a mut State, step_id: &StepId) -> Result<&'a mut Step> {
    state
        .steps
        .iter_mut()
        .find(|s| &s.id == step_id)
        .ok_or_else(|| FlowError::Recorder(format!("step not found: {}", step_id)))
}
