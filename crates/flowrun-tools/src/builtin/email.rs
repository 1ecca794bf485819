use futures::future::BoxFuture;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{json, Value};
use tracing::{debug, info};

use flowrun_core::config::{configured, EmailConfig};
use flowrun_core::error::{FlowError, Result};
use flowrun_core::template::lookup_path;
use flowrun_core::traits::Tool;
use flowrun_core::types::{ToolContext, ToolResult, Validation};

use super::{finish, has, mock_id, text_param};

const TOOL: &str = "email.send";

/// Outbound email over SMTP, with an optional CSV attachment.
pub struct EmailTool {
    config: Option<EmailConfig>,
}

impl EmailTool {
    pub fn new(config: Option<EmailConfig>) -> Self {
        Self { config }
    }

    fn smtp(&self) -> Option<&EmailConfig> {
        self.config.as_ref().filter(|c| !c.host.trim().is_empty())
    }

    async fn send(&self, params: &Value, logs: &mut Vec<String>) -> Result<Value> {
        let recipients = recipients(params);
        logs.push(format!("Sending email to {}", recipients.join(",")));

        let csv = match csv_source(params) {
            Some(records) => {
                let content = records_to_csv(records)?;
                logs.push("Attached CSV file".to_string());
                Some(content)
            }
            None => None,
        };

        let Some(cfg) = self.smtp() else {
            logs.push("SMTP not configured - using mock mode".to_string());
            logs.push("[MOCK MODE] Would send email".to_string());
            logs.push(format!(
                "Subject: {}",
                text_param(params, &["subject"]).unwrap_or_default()
            ));
            return Ok(json!({
                "messageId": mock_id("mock"),
                "accepted": recipients,
                "rejected": [],
                "mock": true,
            }));
        };

        let message_id = format!("<{}@flowrun>", uuid::Uuid::new_v4());
        let message = build_message(cfg, params, &recipients, csv, &message_id)?;
        let mailer = transport(cfg)?;

        debug!(host = %cfg.host, port = cfg.port, "Sending email over SMTP");
        let response = mailer
            .send(message)
            .await
            .map_err(|e| FlowError::upstream("smtp", e))?;

        info!(message_id = %message_id, code = %response.code(), "Email sent");
        logs.push(format!("Email sent successfully: {}", message_id));

        Ok(json!({
            "messageId": message_id,
            "accepted": recipients,
            "rejected": [],
        }))
    }
}

impl Tool for EmailTool {
    fn name(&self) -> &str {
        TOOL
    }

    fn description(&self) -> &str {
        "Send email using SMTP"
    }

    fn validate_params(&self, params: &Value) -> Validation {
        let mut v = Validation::ok();
        v.require(has(params, "to"), "Missing required parameter: to");
        v.require(has(params, "subject"), "Missing required parameter: subject");
        v.require(
            has(params, "body") || has(params, "html"),
            "Missing required parameter: body or html",
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
            let outcome = self.send(&params, &mut logs).await;
            finish(outcome, logs)
        })
    }

    fn is_configured(&self) -> bool {
        self.smtp().is_some()
    }
}

/// `to` may be one address, a comma-separated list, or an array.
fn recipients(params: &Value) -> Vec<String> {
    match params.get("to") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Records named by `attachCSVFrom`, looked up inside the params themselves.
fn csv_source(params: &Value) -> Option<&Vec<Value>> {
    let path = params.get("attachCSVFrom")?.as_str()?;
    lookup_path(params, path)?.as_array()
}

/// Header row from the first record's keys; each cell is the JSON text of
/// the value, with falsy values written as `""`.
pub(crate) fn records_to_csv(records: &[Value]) -> Result<String> {
    let Some(first) = records.first() else {
        return Ok(String::new());
    };
    let headers: Vec<String> = first
        .as_object()
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();

    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Never)
        .terminator(csv::Terminator::Any(b'\n'))
        .flexible(true)
        .from_writer(Vec::new());

    let csv_err = |e: csv::Error| FlowError::ToolExecution {
        tool: TOOL.to_string(),
        message: format!("Failed to build CSV: {}", e),
    };

    wtr.write_record(&headers).map_err(csv_err)?;
    for record in records {
        let row: Vec<String> = headers
            .iter()
            .map(|h| match record.get(h) {
                Some(v) if flowrun_core::expr::is_truthy(v) => v.to_string(),
                _ => "\"\"".to_string(),
            })
            .collect();
        wtr.write_record(&row).map_err(csv_err)?;
    }

    let bytes = wtr.into_inner().map_err(|e| FlowError::ToolExecution {
        tool: TOOL.to_string(),
        message: format!("Failed to build CSV: {}", e),
    })?;
    let mut out = String::from_utf8_lossy(&bytes).into_owned();
    if out.ends_with('\n') {
        out.pop();
    }
    Ok(out)
}

fn build_message(
    cfg: &EmailConfig,
    params: &Value,
    recipients: &[String],
    csv: Option<String>,
    message_id: &str,
) -> Result<Message> {
    let invalid = |what: &str, e: &dyn std::fmt::Display| {
        FlowError::Validation(format!("Invalid {} address: {}", what, e))
    };

    let sender = configured(&cfg.from)
        .or_else(|| configured(&cfg.username))
        .ok_or_else(|| FlowError::Config("email: no sender address configured".into()))?;
    let from: Mailbox = sender.parse().map_err(|e| invalid("from", &e))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(text_param(params, &["subject"]).unwrap_or_default())
        .message_id(Some(message_id.to_string()));
    for addr in recipients {
        let to: Mailbox = addr.parse().map_err(|e| invalid("to", &e))?;
        builder = builder.to(to);
    }

    let text = text_param(params, &["body"]);
    let html = text_param(params, &["html"]);
    let content = match (text, html) {
        (Some(t), Some(h)) => MultiPart::mixed().multipart(MultiPart::alternative_plain_html(t, h)),
        (None, Some(h)) => MultiPart::mixed().singlepart(SinglePart::html(h)),
        (t, None) => MultiPart::mixed().singlepart(SinglePart::plain(t.unwrap_or_default())),
    };
    let content = match csv {
        Some(data) => {
            let content_type = ContentType::parse("text/csv").map_err(|e| {
                FlowError::ToolExecution {
                    tool: TOOL.to_string(),
                    message: e.to_string(),
                }
            })?;
            content.singlepart(Attachment::new("data.csv".to_string()).body(data, content_type))
        }
        None => content,
    };

    builder
        .multipart(content)
        .map_err(|e| FlowError::ToolExecution {
            tool: TOOL.to_string(),
            message: format!("Failed to build message: {}", e),
        })
}

fn transport(cfg: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let builder = if cfg.secure {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
    }
    .map_err(|e| FlowError::upstream("smtp", e))?;

    let mut builder = builder.port(cfg.port);
    if let (Some(user), Some(pass)) = (configured(&cfg.username), configured(&cfg.password)) {
        builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
    }
    Ok(builder.build())
}
