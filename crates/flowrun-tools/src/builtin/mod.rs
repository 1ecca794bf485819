pub mod email;
pub mod n8n;
pub mod sheets;
pub mod whatsapp;

pub use email::EmailTool;
pub use n8n::N8nTool;
pub use sheets::{SheetsAppendTool, SheetsReadTool};
pub use whatsapp::WhatsAppTool;

use std::time::Duration;

use serde_json::Value;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::expr::is_truthy;
use flowrun_core::types::ToolResult;

/// Shared HTTP client settings for tools that call out over HTTP.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("flowrun/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Whether `params[key]` is present and truthy.
pub(crate) fn has(params: &Value, key: &str) -> bool {
    params.get(key).is_some_and(is_truthy)
}

/// First truthy parameter among `keys`, rendered as text.
pub(crate) fn text_param(params: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| params.get(*k))
        .find(|v| is_truthy(v))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

/// Strip everything but ASCII digits.
pub(crate) fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Time-based id used for mock results, e.g. `mock_1718000000000`.
pub(crate) fn mock_id(prefix: &str) -> String {
    format!("{}_{}", prefix, chrono::Utc::now().timestamp_millis())
}

/// Read a response body, failing on non-2xx. Non-JSON bodies come back as a
/// JSON string.
pub(crate) async fn read_body(service: &str, resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| FlowError::upstream(service, format!("Failed to read response body: {}", e)))?;
    if !status.is_success() {
        return Err(FlowError::upstream(
            service,
            format!("HTTP {}: {}", status.as_u16(), text.trim()),
        ));
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

pub(crate) fn request_failed(service: &str, e: reqwest::Error) -> FlowError {
    FlowError::upstream(service, format!("Request failed: {}", e))
}

/// Fold the outcome of a tool body into the uniform result.
pub(crate) fn finish(outcome: Result<Value>, mut logs: Vec<String>) -> ToolResult {
    match outcome {
        Ok(data) => ToolResult::success(data, logs),
        Err(e) => {
            let message = e.to_string();
            logs.push(format!("Error: {}", message));
            ToolResult::failure(message, logs)
        }
    }
}
