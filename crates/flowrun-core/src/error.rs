use thiserror::Error;

use crate::types::RunId;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph errors
    #[error("No trigger node found in workflow")]
    NoTriggerFound,

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    // Tool errors
    #[error("Tool parameter validation failed: {0}")]
    Validation(String),

    #[error("No tool found for {0}")]
    ToolNotFound(String),

    #[error("{message}")]
    ToolExecution { tool: String, message: String },

    #[error("Upstream service error: {service}: {message}")]
    UpstreamService { service: String, message: String },

    /// A node failed after the run was opened. `source` carries the cause.
    #[error("{source}")]
    RunFailed {
        run_id: RunId,
        #[source]
        source: Box<FlowError>,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Recorder error: {0}")]
    Recorder(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub fn upstream(service: impl Into<String>, message: impl ToString) -> Self {
        Self::UpstreamService {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// The error that caused a run to fail, looking through `RunFailed`.
    pub fn root_cause(&self) -> &FlowError {
        match self {
            FlowError::RunFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Run id attached to this error, if it was raised after a run opened.
    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            FlowError::RunFailed { run_id, .. } => Some(run_id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failed_displays_cause() {
        let err = FlowError::RunFailed {
            run_id: RunId::from_string("r1"),
            source: Box::new(FlowError::UnknownNodeType("bogus.type".into())),
        };
        assert_eq!(err.to_string(), "Unknown node type: bogus.type");
        assert!(matches!(err.root_cause(), FlowError::UnknownNodeType(t) if t == "bogus.type"));
        assert_eq!(err.run_id().map(|r| r.0.as_str()), Some("r1"));
    }

    #[test]
    fn tool_execution_displays_message_only() {
        let err = FlowError::ToolExecution {
            tool: "email.send".into(),
            message: "Missing required parameter: to".into(),
        };
        assert_eq!(err.to_string(), "Missing required parameter: to");
    }
}
