use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use flowrun_core::traits::Tool;
use flowrun_core::types::{RunId, ToolContext, ToolResult, Validation};

/// One recorded invocation of a [`ScriptedTool`].
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub params: Value,
    pub user_id: String,
    pub run_id: RunId,
    pub node_id: String,
}

/// Shared view of the calls a [`ScriptedTool`] received. Stays valid after the
/// tool itself has been moved into a registry.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<ToolCall>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<ToolCall> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Params of the `i`th call.
    pub fn params(&self, i: usize) -> Value {
        self.0.lock().unwrap()[i].params.clone()
    }

    fn push(&self, call: ToolCall) {
        self.0.lock().unwrap().push(call);
    }
}

enum Script {
    Respond(ToolResult),
    Echo,
}

/// A tool that answers from a script and remembers what it was called with.
pub struct ScriptedTool {
    name: String,
    script: Script,
    required: Vec<String>,
    calls: CallLog,
}

impl ScriptedTool {
    /// Succeeds with `data` on every call.
    pub fn succeeding(name: impl Into<String>, data: Value) -> Self {
        Self::new(name, Script::Respond(ToolResult::success(data, vec![])))
    }

    /// Reports `success: false` with `error` on every call.
    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(name, Script::Respond(ToolResult::failure(error, vec![])))
    }

    /// Reports `success: false` without an error message.
    pub fn failing_silently(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Script::Respond(ToolResult {
                success: false,
                ..Default::default()
            }),
        )
    }

    /// Succeeds with the params it was given.
    pub fn echo(name: impl Into<String>) -> Self {
        Self::new(name, Script::Echo)
    }

    fn new(name: impl Into<String>, script: Script) -> Self {
        Self {
            name: name.into(),
            script,
            required: vec![],
            calls: CallLog::default(),
        }
    }

    /// Log lines returned with every result.
    pub fn with_logs(mut self, logs: &[&str]) -> Self {
        if let Script::Respond(ref mut result) = self.script {
            result.logs = logs.iter().map(|l| l.to_string()).collect();
        }
        self
    }

    /// Params that must be present, checked the way the built-in tools do.
    pub fn requiring(mut self, keys: &[&str]) -> Self {
        self.required = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Scripted test tool"
    }

    fn validate_params(&self, params: &Value) -> Validation {
        let mut v = Validation::ok();
        for key in &self.required {
            v.require(
                params.get(key).is_some_and(|p| !p.is_null()),
                format!("Missing required parameter: {}", key),
            );
        }
        v
    }

    fn execute(&self, params: Value, ctx: ToolContext) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            self.calls.push(ToolCall {
                params: params.clone(),
                user_id: ctx.user_id,
                run_id: ctx.run_id,
                node_id: ctx.node_id,
            });

            let validation = self.validate_params(&params);
            if !validation.is_valid() {
                return ToolResult::failure(validation.errors.join(", "), vec![]);
            }

            match &self.script {
                Script::Respond(result) => result.clone(),
                Script::Echo => ToolResult::success(params, vec![]),
            }
        })
    }
}
