use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use flowrun_core::config::{configured, N8nConfig};
use flowrun_core::error::Result;
use flowrun_core::traits::Tool;
use flowrun_core::types::{ToolContext, ToolResult, Validation};

use super::{finish, has, http_client, mock_id, read_body, request_failed, text_param};

/// Triggers an n8n workflow, by id through the REST API or by webhook URL.
pub struct N8nTool {
    config: N8nConfig,
    client: reqwest::Client,
}

impl N8nTool {
    pub fn new(config: Option<N8nConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
            client: http_client(),
        }
    }

    async fn trigger(&self, params: &Value, logs: &mut Vec<String>) -> Result<Value> {
        let payload = params
            .get("payload")
            .filter(|p| !p.is_null())
            .cloned()
            .unwrap_or_else(|| json!({}));

        match text_param(params, &["workflowId"]) {
            Some(workflow_id) => self.trigger_by_id(&workflow_id, payload, logs).await,
            None => {
                let url = text_param(params, &["webhookUrl"]).unwrap_or_default();
                self.trigger_webhook(&url, payload, has(params, "secretRef"), logs)
                    .await
            }
        }
    }

    async fn trigger_by_id(
        &self,
        workflow_id: &str,
        payload: Value,
        logs: &mut Vec<String>,
    ) -> Result<Value> {
        let Some(api_key) = configured(&self.config.api_key) else {
            logs.push("n8n API key not configured - using mock mode".to_string());
            logs.push("[MOCK MODE] Would trigger n8n workflow".to_string());
            logs.push(format!("Workflow ID: {}", workflow_id));
            logs.push(format!("Payload: {}", payload));
            return Ok(json!({
                "executionId": mock_id("mock_exec"),
                "status": "success",
                "mock": true,
            }));
        };

        logs.push(format!("Triggering n8n workflow: {}", workflow_id));
        let url = format!(
            "{}/api/v1/workflows/{}/execute",
            self.config.base_url.trim_end_matches('/'),
            workflow_id
        );
        debug!(url = %url, "Triggering n8n workflow");

        let resp = self
            .client
            .post(&url)
            .header("X-N8N-API-KEY", api_key)
            .json(&json!({ "data": payload }))
            .send()
            .await
            .map_err(|e| request_failed("n8n", e))?;
        let body = read_body("n8n", resp).await?;

        let execution_id = body.get("executionId").cloned().unwrap_or(Value::Null);
        logs.push(format!(
            "n8n workflow triggered: {}",
            execution_id.as_str().map(str::to_string).unwrap_or_else(|| execution_id.to_string())
        ));
        Ok(json!({
            "executionId": execution_id,
            "status": body.get("status").cloned().unwrap_or(Value::Null),
            "result": body.get("data").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn trigger_webhook(
        &self,
        url: &str,
        payload: Value,
        with_secret: bool,
        logs: &mut Vec<String>,
    ) -> Result<Value> {
        logs.push(format!("Triggering n8n webhook: {}", url));

        let mut req = self.client.post(url).json(&payload);
        if with_secret {
            if let Some(secret) = configured(&self.config.webhook_secret) {
                req = req.header("X-N8N-Webhook-Secret", secret);
            }
        }
        let resp = req.send().await.map_err(|e| request_failed("n8n", e))?;
        let body = read_body("n8n", resp).await?;

        logs.push("n8n webhook triggered successfully".to_string());
        Ok(body)
    }
}

impl Tool for N8nTool {
    fn name(&self) -> &str {
        "n8n.trigger"
    }

    fn description(&self) -> &str {
        "Trigger n8n workflow via HTTP API"
    }

    fn validate_params(&self, params: &Value) -> Validation {
        let mut v = Validation::ok();
        v.require(
            has(params, "workflowId") || has(params, "webhookUrl"),
            "Missing required parameter: workflowId or webhookUrl",
        );
        v
    }

    fn execute(&self, params: Value, _ctx: ToolContext) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            let mut logs = Vec::new();
            let validation = self.validate_params(&params);
            if !validation.is_valid() {
                return ToolResult::failure(validation.errors.join(", "), logs);
            }
            let outcome = self.trigger(&params, &mut logs).await;
            finish(outcome, logs)
        })
    }

    fn is_configured(&self) -> bool {
        configured(&self.config.api_key).is_some()
    }
}
