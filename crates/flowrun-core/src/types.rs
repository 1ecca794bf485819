use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{FlowError, Result};

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique step identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status shared by runs, steps and tool executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(FlowError::Recorder(format!("unknown status: {}", other))),
        }
    }
}

/// Terminal outcome of a run or a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Value),
    Failed(String),
}

impl Outcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Outcome::Completed(_) => RunStatus::Completed,
            Outcome::Failed(_) => RunStatus::Failed,
        }
    }
}

/// One execution of a workflow against a trigger payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub workflow_id: String,
    pub status: RunStatus,
    pub trigger_data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// A single timestamped line in a step's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl StepLog {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// The execution record of one node within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: StepId,
    pub run_id: RunId,
    pub node_id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub status: RunStatus,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<StepLog>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Audit record of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub run_id: RunId,
    pub step_id: StepId,
    pub tool: String,
    pub params: Value,
    pub response: Value,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

/// What the engine hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub result: Value,
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub run_id: RunId,
    pub node_id: String,
}

/// Uniform tool result. Tools report failures here rather than erroring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl ToolResult {
    pub fn success(data: Value, logs: Vec<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            logs,
        }
    }

    pub fn failure(error: impl Into<String>, logs: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            logs,
        }
    }

    /// Whether the tool answered from mock mode.
    pub fn is_mock(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get("mock"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Result of `Tool::validate_params`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub errors: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn require(&mut self, present: bool, message: impl Into<String>) {
        if !present {
            self.errors.push(message.into());
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(FlowError::Validation(self.errors.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_round_trips_as_lowercase() {
        assert_eq!(serde_json::to_value(RunStatus::Completed).unwrap(), json!("completed"));
        assert_eq!("failed".parse::<RunStatus>().unwrap(), RunStatus::Failed);
        assert!("done".parse::<RunStatus>().is_err());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn tool_result_mock_flag() {
        let mock = ToolResult::success(json!({"mock": true}), vec![]);
        assert!(mock.is_mock());
        let real = ToolResult::success(json!({"messageId": "x"}), vec![]);
        assert!(!real.is_mock());
        assert!(!ToolResult::failure("boom", vec![]).is_mock());
    }

    #[test]
    fn validation_collects_errors() {
        let mut v = Validation::ok();
        v.require(true, "never");
        v.require(false, "Missing required parameter: to");
        v.require(false, "Missing required parameter: subject");
        assert!(!v.is_valid());
        let err = v.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Tool parameter validation failed: Missing required parameter: to, Missing required parameter: subject"
        );
    }
}
