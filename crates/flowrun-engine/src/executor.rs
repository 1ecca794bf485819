use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{error, info, warn};

use flowrun_core::error::{FlowError, Result};
use flowrun_core::graph::{Node, WorkflowGraph};
use flowrun_core::traits::RunRecorder;
use flowrun_core::types::{Outcome, RunId, RunStatus, RunSummary};
use flowrun_tools::ToolRegistry;

use crate::context::ExecutionContext;
use crate::dispatcher::{NodeDispatcher, StepHandle};

/// Identity of the run being executed.
struct RunScope<'a> {
    run_id: RunId,
    user_id: &'a str,
    graph: &'a WorkflowGraph,
}

/// Executes workflow graphs.
///
/// Holds no per-run state, so one engine can serve concurrent runs. Within a
/// run, nodes execute one at a time, depth-first, in edge declaration order.
pub struct WorkflowEngine {
    dispatcher: NodeDispatcher,
    recorder: Arc<dyn RunRecorder>,
}

impl WorkflowEngine {
    pub fn new(tools: Arc<ToolRegistry>, recorder: Arc<dyn RunRecorder>) -> Self {
        Self {
            dispatcher: NodeDispatcher::new(tools, recorder.clone()),
            recorder,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.dispatcher.tools()
    }

    /// Execute `graph` against `trigger_data`.
    ///
    /// The returned result is the trigger node's own output. Failures after the
    /// run has been opened come back as [`FlowError::RunFailed`], with the run
    /// already marked failed. A recorder failure while opening the run is
    /// returned as is.
    pub async fn execute(
        &self,
        workflow_id: &str,
        user_id: &str,
        graph: &WorkflowGraph,
        trigger_data: Value,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let run_id = self.recorder.create_run(workflow_id, &trigger_data).await?;
        info!(run_id = %run_id, workflow_id, user_id, "Run started");

        let scope = RunScope {
            run_id: run_id.clone(),
            user_id,
            graph,
        };
        let mut ctx = ExecutionContext::new(trigger_data);

        let outcome = match graph.trigger() {
            Some(trigger) => {
                let input = ctx.trigger_data().clone();
                self.execute_node(&scope, &mut ctx, trigger, input).await
            }
            None => Err(FlowError::NoTriggerFound),
        };

        match outcome {
            Ok(result) => {
                self.recorder
                    .finish_run(&run_id, Outcome::Completed(result.clone()))
                    .await
                    .map_err(|e| run_failed(&run_id, e))?;
                info!(
                    run_id = %run_id,
                    nodes = ctx.completed().len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Run completed"
                );
                Ok(RunSummary {
                    run_id,
                    status: RunStatus::Completed,
                    result,
                })
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run failed");
                if let Err(rec) = self
                    .recorder
                    .finish_run(&run_id, Outcome::Failed(e.to_string()))
                    .await
                {
                    error!(run_id = %run_id, error = %rec, "Failed to record run failure");
                }
                Err(run_failed(&run_id, e))
            }
        }
    }

    /// Run one node, then every node its firing edges lead to.
    fn execute_node<'a>(
        &'a self,
        scope: &'a RunScope<'a>,
        ctx: &'a mut ExecutionContext,
        node: &'a Node,
        input: Value,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let step_id = self
                .recorder
                .create_step(&scope.run_id, &node.id, &node.node_type, &input)
                .await?;
            let step = StepHandle::new(
                self.recorder.clone(),
                scope.run_id.clone(),
                step_id.clone(),
                node.id.clone(),
                scope.user_id,
            );
            info!(run_id = %scope.run_id, node_id = %node.id, node_type = %node.node_type, "Executing node");

            let output = match self.dispatcher.dispatch(node, &input, &step).await {
                Ok(output) => output,
                Err(e) => {
                    if let Err(rec) = self
                        .recorder
                        .finish_step(&step_id, Outcome::Failed(e.to_string()))
                        .await
                    {
                        error!(node_id = %node.id, error = %rec, "Failed to record step failure");
                    }
                    return Err(e);
                }
            };

            self.recorder
                .finish_step(&step_id, Outcome::Completed(output.clone()))
                .await?;
            ctx.record(node.id.clone(), output.clone());

            let next: Vec<&'a Node> = scope
                .graph
                .outgoing(&node.id)
                .filter(|edge| edge.fires(&output))
                .filter_map(|edge| {
                    let target = scope.graph.node(&edge.target);
                    if target.is_none() {
                        warn!(edge = %edge.id, target = %edge.target, "Edge target not found, skipping");
                    }
                    target
                })
                .collect();

            for target in next {
                self.execute_node(scope, &mut *ctx, target, output.clone())
                    .await?;
            }

            Ok(output)
        })
    }
}

fn run_failed(run_id: &RunId, source: FlowError) -> FlowError {
    FlowError::RunFailed {
        run_id: run_id.clone(),
        source: Box::new(source),
    }
}
