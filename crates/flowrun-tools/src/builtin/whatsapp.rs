use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, warn};

use flowrun_core::config::{WhatsAppConfig, WhatsAppProvider};
use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::Tool;
use flowrun_core::types::{ToolContext, ToolResult, Validation};

use super::{digits, finish, has, http_client, mock_id, read_body, request_failed, text_param};

/// WhatsApp message send through Twilio, the Meta Cloud API, or TextMe Bot.
pub struct WhatsAppTool {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

struct Outgoing {
    to: String,
    message: String,
}

impl WhatsAppTool {
    pub fn new(config: Option<WhatsAppConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
            client: http_client(),
        }
    }

    async fn send(&self, params: &Value, logs: &mut Vec<String>) -> Result<Value> {
        let out = Outgoing {
            to: text_param(params, &["to", "toField"]).unwrap_or_default(),
            message: text_param(params, &["message", "messageTemplate"]).unwrap_or_default(),
        };

        match self.config.active_provider() {
            Some(WhatsAppProvider::Twilio) => self.send_twilio(&out, logs).await,
            Some(WhatsAppProvider::Meta) => self.send_meta(&out, logs).await,
            Some(WhatsAppProvider::Textme) => self.send_textme(&out, logs).await,
            None => {
                if let Some(preferred) = self.config.provider {
                    warn!(provider = preferred.as_str(), "WhatsApp provider selected but not configured");
                }
                logs.push("WhatsApp credentials not configured - using mock mode".to_string());
                Ok(mock_send(&out, logs))
            }
        }
    }

    async fn send_twilio(&self, out: &Outgoing, logs: &mut Vec<String>) -> Result<Value> {
        let cfg = self
            .config
            .twilio
            .as_ref()
            .ok_or_else(|| FlowError::Config("twilio section missing".into()))?;

        logs.push(format!("Sending WhatsApp via Twilio to {}", out.to));

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            cfg.api_base.trim_end_matches('/'),
            cfg.account_sid
        );
        let form = [
            ("From", whatsapp_address(&cfg.from)),
            ("To", whatsapp_address(&out.to)),
            ("Body", out.message.clone()),
        ];
        let resp = self
            .client
            .post(&url)
            .basic_auth(&cfg.account_sid, Some(&cfg.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| request_failed("twilio", e))?;
        let body = read_body("twilio", resp).await?;

        let sid = body.get("sid").cloned().unwrap_or(Value::Null);
        logs.push(format!("Message sent successfully: {}", render(&sid)));
        Ok(json!({
            "messageId": sid,
            "status": body.get("status").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn send_meta(&self, out: &Outgoing, logs: &mut Vec<String>) -> Result<Value> {
        let cfg = self
            .config
            .meta
            .as_ref()
            .ok_or_else(|| FlowError::Config("meta section missing".into()))?;

        logs.push(format!("Sending WhatsApp via Meta Cloud API to {}", out.to));

        let url = format!(
            "{}/{}/messages",
            cfg.api_base.trim_end_matches('/'),
            cfg.phone_number_id
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&cfg.token)
            .json(&json!({
                "messaging_product": "whatsapp",
                "to": digits(&out.to),
                "type": "text",
                "text": { "body": out.message },
            }))
            .send()
            .await
            .map_err(|e| request_failed("meta", e))?;
        let body = read_body("meta", resp).await?;

        let id = body
            .pointer("/messages/0/id")
            .cloned()
            .ok_or_else(|| FlowError::upstream("meta", "response carried no message id"))?;
        logs.push(format!("Message sent successfully: {}", render(&id)));
        Ok(json!({ "messageId": id }))
    }

    async fn send_textme(&self, out: &Outgoing, logs: &mut Vec<String>) -> Result<Value> {
        let cfg = self
            .config
            .textme
            .as_ref()
            .ok_or_else(|| FlowError::Config("textme section missing".into()))?;

        logs.push(format!("Sending WhatsApp via TextMe Bot to {}", out.to));

        let url = format!("{}/send.php", cfg.api_base.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("recipient", digits(&out.to).as_str()),
                ("apikey", cfg.api_key.as_str()),
                ("text", out.message.as_str()),
            ])
            .send()
            .await
            .map_err(|e| request_failed("textme", e))?;
        let body = read_body("textme", resp).await?;

        logs.push("Message sent successfully via TextMe Bot".to_string());
        Ok(json!({
            "messageId": mock_id("textme"),
            "status": "sent",
            "response": body,
        }))
    }
}

impl Tool for WhatsAppTool {
    fn name(&self) -> &str {
        "whatsapp.send"
    }

    fn description(&self) -> &str {
        "Send WhatsApp message via Twilio, Meta Cloud API, or TextMe Bot"
    }

    fn validate_params(&self, params: &Value) -> Validation {
        let mut v = Validation::ok();
        v.require(
            has(params, "to") || has(params, "toField"),
            "Missing required parameter: to or toField",
        );
        v.require(
            has(params, "message") || has(params, "messageTemplate"),
            "Missing required parameter: message or messageTemplate",
        );
        v
    }

    fn execute(&self, params: Value, ctx: ToolContext) -> BoxFuture<'_, ToolResult> {
        Box::pin(async move {
            let mut logs = Vec::new();
            let validation = self.validate_params(&params);
            if !validation.is_valid() {
                return ToolResult::failure(validation.errors.join(", "), logs);
            }
            debug!(run_id = %ctx.run_id, node_id = %ctx.node_id, "Sending WhatsApp message");
            let outcome = self.send(&params, &mut logs).await;
            finish(outcome, logs)
        })
    }

    fn is_configured(&self) -> bool {
        self.config.active_provider().is_some()
    }
}

fn mock_send(out: &Outgoing, logs: &mut Vec<String>) -> Value {
    logs.push("[MOCK MODE] Would send WhatsApp message".to_string());
    logs.push(format!("To: {}", out.to));
    logs.push(format!("Message: {}", out.message));
    json!({
        "messageId": mock_id("mock"),
        "status": "sent",
        "mock": true,
    })
}

fn whatsapp_address(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{}", number)
    }
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
