use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use flowrun_core::error::{FlowError, Result};
use flowrun_core::expr::evaluate_condition;
use flowrun_core::graph::{ConditionProps, ExternalProps, Node, NodeKind, TransformProps};
use flowrun_core::template::interpolate;
use flowrun_core::traits::{RunRecorder, Tool};
use flowrun_core::types::{RunId, RunStatus, StepId, ToolContext, ToolExecution, ToolResult};
use flowrun_tools::ToolRegistry;

use crate::transform;

/// Tool every `external.*` node goes through.
pub const EXTERNAL_TOOL: &str = "n8n.trigger";

/// The open step a node is running under.
pub struct StepHandle {
    recorder: Arc<dyn RunRecorder>,
    pub run_id: RunId,
    pub step_id: StepId,
    pub node_id: String,
    pub user_id: String,
}

impl StepHandle {
    pub fn new(
        recorder: Arc<dyn RunRecorder>,
        run_id: RunId,
        step_id: StepId,
        node_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            recorder,
            run_id,
            step_id,
            node_id: node_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Append a line to the step log. Resolves once the line is recorded.
    pub async fn log(&self, message: impl AsRef<str>) -> Result<()> {
        let message = message.as_ref();
        debug!(run_id = %self.run_id, node_id = %self.node_id, "{}", message);
        self.recorder.append_step_log(&self.step_id, message).await
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            user_id: self.user_id.clone(),
            run_id: self.run_id.clone(),
            node_id: self.node_id.clone(),
        }
    }
}

/// Routes a node to the handling for its kind.
pub struct NodeDispatcher {
    tools: Arc<ToolRegistry>,
    recorder: Arc<dyn RunRecorder>,
}

impl NodeDispatcher {
    pub fn new(tools: Arc<ToolRegistry>, recorder: Arc<dyn RunRecorder>) -> Self {
        Self { tools, recorder }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one node against `input` and return its output.
    pub async fn dispatch(&self, node: &Node, input: &Value, step: &StepHandle) -> Result<Value> {
        match &node.kind {
            NodeKind::Trigger { .. } => {
                step.log(format!("Trigger activated: {}", node.node_type)).await?;
                Ok(input.clone())
            }
            NodeKind::Action { props } => self.run_action(node, props, input, step).await,
            NodeKind::Condition(props) => self.run_condition(props, input, step).await,
            NodeKind::Transform(props) => self.run_transform(props, input, step).await,
            NodeKind::External(props) => self.run_external(node, props, input, step).await,
            NodeKind::Unknown { .. } => Err(FlowError::UnknownNodeType(node.node_type.clone())),
            NodeKind::Invalid { reason, .. } => Err(FlowError::InvalidWorkflow(format!(
                "node '{}' ({}): {}",
                node.id, node.node_type, reason
            ))),
        }
    }

    async fn run_action(
        &self,
        node: &Node,
        props: &Value,
        input: &Value,
        step: &StepHandle,
    ) -> Result<Value> {
        step.log(format!("Executing action: {}", node.node_type)).await?;

        let tool = self
            .tools
            .get_by_type(&node.node_type)
            .ok_or_else(|| FlowError::ToolNotFound(format!("action type: {}", node.node_type)))?;

        let params = interpolate(props, input);
        self.invoke(tool, params, step, "Tool execution failed").await
    }

    async fn run_condition(
        &self,
        props: &ConditionProps,
        input: &Value,
        step: &StepHandle,
    ) -> Result<Value> {
        step.log(format!("Evaluating condition: {}", props.expr)).await?;
        let result = evaluate_condition(&props.expr, input);
        step.log(format!("Condition result: {}", result)).await?;

        Ok(json!({
            "conditionResult": result,
            "data": input,
        }))
    }

    async fn run_transform(
        &self,
        props: &TransformProps,
        input: &Value,
        step: &StepHandle,
    ) -> Result<Value> {
        step.log("Applying transformations").await?;

        let mut data = input.clone();
        for t in &props.steps {
            data = transform::apply(t, data);
            step.log(format!("Applied transformation: {}", t.op_name())).await?;
        }
        Ok(data)
    }

    async fn run_external(
        &self,
        node: &Node,
        props: &ExternalProps,
        input: &Value,
        step: &StepHandle,
    ) -> Result<Value> {
        step.log(format!("Executing external service: {}", node.node_type)).await?;

        let tool = self
            .tools
            .get(EXTERNAL_TOOL)
            .ok_or_else(|| FlowError::ToolNotFound(EXTERNAL_TOOL.to_string()))?;

        let mut params = json!({
            "workflowId": props.workflow_id.clone().unwrap_or(Value::Null),
            "payload": input,
            "secretRef": props.secret_ref,
        });
        if let Some(url) = &props.webhook_url {
            params["webhookUrl"] = Value::String(url.clone());
        }

        self.invoke(tool, params, step, "External execution failed").await
    }

    /// Execute a tool, audit the call, and copy its log lines onto the step.
    async fn invoke(
        &self,
        tool: Arc<dyn Tool>,
        params: Value,
        step: &StepHandle,
        default_error: &str,
    ) -> Result<Value> {
        let name = tool.name().to_string();
        if !tool.is_configured() {
            debug!(tool = %name, "Tool not configured, expecting mock result");
        }

        let result = tool.execute(params.clone(), step.tool_context()).await;
        info!(
            run_id = %step.run_id,
            node_id = %step.node_id,
            tool = %name,
            success = result.success,
            mock = result.is_mock(),
            "Tool executed"
        );

        self.recorder
            .record_tool_execution(ToolExecution {
                run_id: step.run_id.clone(),
                step_id: step.step_id.clone(),
                tool: name.clone(),
                params,
                response: audit_response(&result),
                status: if result.success {
                    RunStatus::Completed
                } else {
                    RunStatus::Failed
                },
                created_at: Utc::now(),
            })
            .await?;

        for line in &result.logs {
            step.log(line).await?;
        }

        if !result.success {
            let message = result
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| default_error.to_string());
            warn!(tool = %name, error = %message, "Tool reported failure");
            return Err(FlowError::ToolExecution {
                tool: name,
                message,
            });
        }

        Ok(result.data.unwrap_or(Value::Null))
    }
}

fn audit_response(result: &ToolResult) -> Value {
    match (&result.data, &result.error) {
        (Some(data), _) => data.clone(),
        (None, Some(error)) => json!({ "error": error }),
        (None, None) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_core::graph::TransformStep;
    use flowrun_store::MemoryRecorder;
    use flowrun_test_utils::ScriptedTool;

    struct Harness {
        recorder: Arc<MemoryRecorder>,
        dispatcher: NodeDispatcher,
        run_id: RunId,
    }

    impl Harness {
        async fn new(registry: ToolRegistry) -> Self {
            let recorder = Arc::new(MemoryRecorder::new());
            let run_id = recorder.create_run("wf", &json!({})).await.unwrap();
            let dispatcher = NodeDispatcher::new(Arc::new(registry), recorder.clone());
            Self {
                recorder,
                dispatcher,
                run_id,
            }
        }

        async fn run(&self, node: &Node, input: Value) -> (Result<Value>, Vec<String>) {
            let step_id = self
                .recorder
                .create_step(&self.run_id, &node.id, &node.node_type, &input)
                .await
                .unwrap();
            let step = StepHandle::new(
                self.recorder.clone(),
                self.run_id.clone(),
                step_id.clone(),
                node.id.clone(),
                "u1",
            );
            let result = self.dispatcher.dispatch(node, &input, &step).await;
            let logs = self
                .recorder
                .steps_for_run(&self.run_id)
                .unwrap()
                .into_iter()
                .find(|s| s.id == step_id)
                .unwrap()
                .logs
                .into_iter()
                .map(|l| l.message)
                .collect();
            (result, logs)
        }
    }

    #[tokio::test]
    async fn test_trigger_passes_input_through() {
        let h = Harness::new(ToolRegistry::new()).await;
        let (out, logs) = h.run(&Node::trigger("t1"), json!({"a": 1})).await;
        assert_eq!(out.unwrap(), json!({"a": 1}));
        assert_eq!(logs, vec!["Trigger activated: trigger.manual"]);
    }

    #[tokio::test]
    async fn test_action_interpolates_and_audits() {
        let mut registry = ToolRegistry::new();
        let tool = ScriptedTool::echo("echo.run").with_logs(&["ignored for echo"]);
        let calls = tool.calls();
        registry.register(tool);
        registry.map_type("action.echo", "echo.run");
        let h = Harness::new(registry).await;

        let node = Node::new("a1", "action.echo", json!({"to": "{{phone}}", "n": 1}));
        let (out, logs) = h.run(&node, json!({"phone": "6012"})).await;

        assert_eq!(out.unwrap(), json!({"to": "6012", "n": 1}));
        assert_eq!(logs, vec!["Executing action: action.echo"]);
        assert_eq!(calls.len(), 1);
        let call = &calls.calls()[0];
        assert_eq!(call.node_id, "a1");
        assert_eq!(call.user_id, "u1");
        assert_eq!(call.run_id, h.run_id);

        let audits = h.recorder.tool_executions_for_run(&h.run_id).unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].tool, "echo.run");
        assert_eq!(audits[0].params, json!({"to": "6012", "n": 1}));
        assert_eq!(audits[0].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_action_failure_carries_tool_error_and_logs() {
        let mut registry = ToolRegistry::new();
        registry.register(ScriptedTool::failing("boom.run", "smtp refused").with_logs(&["tried"]));
        registry.map_type("action.boom", "boom.run");
        let h = Harness::new(registry).await;

        let node = Node::new("a1", "action.boom", json!({}));
        let (out, logs) = h.run(&node, json!({})).await;

        match out.unwrap_err() {
            FlowError::ToolExecution { tool, message } => {
                assert_eq!(tool, "boom.run");
                assert_eq!(message, "smtp refused");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(logs, vec!["Executing action: action.boom", "tried"]);
        let audits = h.recorder.tool_executions_for_run(&h.run_id).unwrap();
        assert_eq!(audits[0].status, RunStatus::Failed);
        assert_eq!(audits[0].response, json!({"error": "smtp refused"}));
    }

    #[tokio::test]
    async fn test_action_failure_without_message() {
        let mut registry = ToolRegistry::new();
        registry.register(ScriptedTool::failing_silently("quiet.run"));
        registry.map_type("action.quiet", "quiet.run");
        let h = Harness::new(registry).await;

        let node = Node::new("a1", "action.quiet", json!({}));
        let (out, _) = h.run(&node, json!({})).await;
        assert_eq!(out.unwrap_err().to_string(), "Tool execution failed");
    }

    #[tokio::test]
    async fn test_unmapped_action_type() {
        let h = Harness::new(ToolRegistry::new()).await;
        let node = Node::new("a1", "action.sms.send", json!({}));
        let (out, _) = h.run(&node, json!({})).await;
        assert_eq!(
            out.unwrap_err().to_string(),
            "No tool found for action type: action.sms.send"
        );
    }

    #[tokio::test]
    async fn test_condition_wraps_input() {
        let h = Harness::new(ToolRegistry::new()).await;
        let node = Node::condition("c1", "len($.rows) > 1");
        let (out, logs) = h.run(&node, json!({"rows": [1, 2]})).await;
        assert_eq!(
            out.unwrap(),
            json!({"conditionResult": true, "data": {"rows": [1, 2]}})
        );
        assert_eq!(
            logs,
            vec!["Evaluating condition: len($.rows) > 1", "Condition result: true"]
        );

        let (out, _) = h.run(&Node::condition("c2", "not valid ((("), json!({})).await;
        assert_eq!(out.unwrap()["conditionResult"], false);
    }

    #[tokio::test]
    async fn test_transform_logs_each_op() {
        let h = Harness::new(ToolRegistry::new()).await;
        let node = Node::transform(
            "x1",
            vec![
                TransformStep::Trim {
                    fields: vec!["name".into()],
                },
                TransformStep::Unsupported {
                    op: "shuffle".into(),
                    extra: Default::default(),
                },
            ],
        );
        let (out, logs) = h.run(&node, json!({"name": " Ann "})).await;
        assert_eq!(out.unwrap(), json!({"name": "Ann"}));
        assert_eq!(
            logs,
            vec![
                "Applying transformations",
                "Applied transformation: trim",
                "Applied transformation: shuffle"
            ]
        );
    }

    #[tokio::test]
    async fn test_external_goes_through_fixed_tool() {
        let mut registry = ToolRegistry::new();
        let tool = ScriptedTool::succeeding(EXTERNAL_TOOL, json!({"executionId": "x"}));
        let calls = tool.calls();
        registry.register(tool);
        let h = Harness::new(registry).await;

        let node = Node::new(
            "n1",
            "external.zapier",
            json!({"workflowId": "wf-9", "secretRef": "S", "webhookUrl": "http://hook"}),
        );
        let (out, logs) = h.run(&node, json!({"lead": "Ann"})).await;

        assert_eq!(out.unwrap(), json!({"executionId": "x"}));
        assert_eq!(logs[0], "Executing external service: external.zapier");
        assert_eq!(
            calls.params(0),
            json!({
                "workflowId": "wf-9",
                "payload": {"lead": "Ann"},
                "secretRef": "S",
                "webhookUrl": "http://hook"
            })
        );
        assert_eq!(h.recorder.tool_executions_for_run(&h.run_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_external_without_tool() {
        let h = Harness::new(ToolRegistry::new()).await;
        let node = Node::new("n1", "external.n8n", json!({"workflowId": "w"}));
        let (out, _) = h.run(&node, json!({})).await;
        assert!(matches!(out, Err(FlowError::ToolNotFound(ref t)) if t == EXTERNAL_TOOL));
    }

    #[tokio::test]
    async fn test_external_failure_default_message() {
        let mut registry = ToolRegistry::new();
        registry.register(ScriptedTool::failing_silently(EXTERNAL_TOOL));
        let h = Harness::new(registry).await;
        let node = Node::new("n1", "external.n8n", json!({}));
        let (out, _) = h.run(&node, json!({})).await;
        assert_eq!(out.unwrap_err().to_string(), "External execution failed");
    }

    #[tokio::test]
    async fn test_unknown_node_type() {
        let h = Harness::new(ToolRegistry::new()).await;
        let node = Node::new("b1", "bogus.type", json!({}));
        let (out, logs) = h.run(&node, json!({})).await;
        assert!(matches!(out, Err(FlowError::UnknownNodeType(ref t)) if t == "bogus.type"));
        assert!(logs.is_empty());
    }
}
