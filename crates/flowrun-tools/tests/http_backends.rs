use std::collections::HashMap;

use mockito::{mock, Matcher};
use serde_json::json;

use flowrun_core::config::{
    MetaConfig, N8nConfig, SheetsConfig, SheetsCredential, TextMeConfig, TwilioConfig,
    WhatsAppConfig, WhatsAppProvider,
};
use flowrun_core::traits::Tool;
use flowrun_core::types::{RunId, ToolContext};
use flowrun_tools::builtin::{N8nTool, SheetsAppendTool, SheetsReadTool, WhatsAppTool};

fn ctx() -> ToolContext {
    ToolContext {
        user_id: "tester".into(),
        run_id: RunId::new(),
        node_id: "node".into(),
    }
}

fn n8n(api_key: Option<&str>, secret: Option<&str>) -> N8nTool {
    N8nTool::new(Some(N8nConfig {
        base_url: mockito::server_url(),
        api_key: api_key.map(String::from),
        webhook_secret: secret.map(String::from),
    }))
}

fn sheets_config() -> SheetsConfig {
    SheetsConfig {
        api_base: mockito::server_url(),
        credentials: HashMap::from([(
            "sales".to_string(),
            SheetsCredential {
                access_token: Some("ya29.token".into()),
                api_key: None,
            },
        )]),
    }
}

#[tokio::test]
async fn n8n_triggers_workflow_by_id() {
    let m = mock("POST", "/api/v1/workflows/wf-1/execute")
        .match_header("x-n8n-api-key", "n8n-key")
        .match_body(Matcher::Json(json!({"data": {"lead": "Ann"}})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"executionId": "exec-9", "status": "running", "data": {"ok": true}}"#)
        .create();

    let tool = n8n(Some("n8n-key"), None);
    assert!(tool.is_configured());
    let result = tool
        .execute(json!({"workflowId": "wf-1", "payload": {"lead": "Ann"}}), ctx())
        .await;

    m.assert();
    assert!(result.success, "{:?}", result.error);
    assert!(!result.is_mock());
    assert_eq!(
        result.data.unwrap(),
        json!({"executionId": "exec-9", "status": "running", "result": {"ok": true}})
    );
    assert!(result.logs.contains(&"n8n workflow triggered: exec-9".to_string()));
}

#[tokio::test]
async fn n8n_webhook_sends_secret_when_requested() {
    let m = mock("POST", "/webhook/lead-intake")
        .match_header("x-n8n-webhook-secret", "s3cret")
        .match_body(Matcher::Json(json!({"name": "Ann"})))
        .with_status(200)
        .with_body(r#"{"received": true}"#)
        .create();

    let tool = n8n(None, Some("s3cret"));
    let url = format!("{}/webhook/lead-intake", mockito::server_url());
    let result = tool
        .execute(
            json!({"webhookUrl": url, "payload": {"name": "Ann"}, "secretRef": "default"}),
            ctx(),
        )
        .await;

    m.assert();
    assert!(result.success);
    assert_eq!(result.data.unwrap(), json!({"received": true}));
}

#[tokio::test]
async fn n8n_upstream_error_is_a_failed_result() {
    let _m = mock("POST", "/api/v1/workflows/broken/execute")
        .with_status(500)
        .with_body("internal error")
        .create();

    let result = n8n(Some("k"), None)
        .execute(json!({"workflowId": "broken"}), ctx())
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("HTTP 500"), "{error}");
    assert!(result.logs.last().unwrap().starts_with("Error: "));
}

#[tokio::test]
async fn whatsapp_meta_posts_digits_only() {
    let m = mock("POST", "/555000/messages")
        .match_header("authorization", "Bearer meta-token")
        .match_body(Matcher::Json(json!({
            "messaging_product": "whatsapp",
            "to": "60123456789",
            "type": "text",
            "text": {"body": "Hello Ann"}
        })))
        .with_status(200)
        .with_body(r#"{"messages": [{"id": "wamid.1"}]}"#)
        .create();

    let tool = WhatsAppTool::new(Some(WhatsAppConfig {
        provider: Some(WhatsAppProvider::Meta),
        meta: Some(MetaConfig {
            token: "meta-token".into(),
            phone_number_id: "555000".into(),
            api_base: mockito::server_url(),
        }),
        ..WhatsAppConfig::default()
    }));
    let result = tool
        .execute(json!({"to": "+60 12-345 6789", "message": "Hello Ann"}), ctx())
        .await;

    m.assert();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.data.unwrap(), json!({"messageId": "wamid.1"}));
}

#[tokio::test]
async fn whatsapp_twilio_is_first_configured_backend() {
    let m = mock("POST", "/2010-04-01/Accounts/AC123/Messages.json")
        .match_header("authorization", Matcher::Regex("^Basic ".into()))
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("From".into(), "whatsapp:+14155238886".into()),
            Matcher::UrlEncoded("To".into(), "whatsapp:+60123456789".into()),
            Matcher::UrlEncoded("Body".into(), "hi".into()),
        ]))
        .with_status(201)
        .with_body(r#"{"sid": "SM1", "status": "queued"}"#)
        .create();

    // No preferred provider: twilio comes first, textme is never tried.
    let tool = WhatsAppTool::new(Some(WhatsAppConfig {
        provider: None,
        twilio: Some(TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            from: "+14155238886".into(),
            api_base: mockito::server_url(),
        }),
        meta: None,
        textme: Some(TextMeConfig {
            api_key: "tm".into(),
            api_base: "http://127.0.0.1:9".into(),
        }),
    }));
    let result = tool
        .execute(json!({"toField": "+60123456789", "messageTemplate": "hi"}), ctx())
        .await;

    m.assert();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.data.unwrap(), json!({"messageId": "SM1", "status": "queued"}));
}

#[tokio::test]
async fn whatsapp_textme_uses_query_parameters() {
    let m = mock("GET", Matcher::Regex("^/send.php".into()))
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("recipient".into(), "60111".into()),
            Matcher::UrlEncoded("apikey".into(), "tm-key".into()),
            Matcher::UrlEncoded("text".into(), "ping".into()),
        ]))
        .with_status(200)
        .with_body("Success!")
        .create();

    let tool = WhatsAppTool::new(Some(WhatsAppConfig {
        provider: Some(WhatsAppProvider::Textme),
        textme: Some(TextMeConfig {
            api_key: "tm-key".into(),
            api_base: mockito::server_url(),
        }),
        ..WhatsAppConfig::default()
    }));
    let result = tool
        .execute(json!({"to": "+60 111", "message": "ping"}), ctx())
        .await;

    m.assert();
    assert!(result.success, "{:?}", result.error);
    let data = result.data.unwrap();
    assert_eq!(data["status"], "sent");
    assert_eq!(data["response"], "Success!");
}

#[tokio::test]
async fn sheets_read_maps_headers_with_named_credential() {
    let m = mock("GET", "/spreadsheets/sheet-1/values/Leads!A1:C3")
        .match_header("authorization", "Bearer ya29.token")
        .with_status(200)
        .with_body(
            r#"{"range": "Leads!A1:C3", "values": [["name", "email", "status"], ["Ann", "ann@example.com", "pending"], ["Bo", "", "done"]]}"#,
        )
        .create();

    let tool = SheetsReadTool::new(Some(sheets_config()));
    assert!(tool.is_configured());
    let result = tool
        .execute(
            json!({
                "sheet": "https://docs.google.com/spreadsheets/d/sheet-1/edit",
                "range": "Leads!A1:C3",
                "credentialRef": "sales",
                "filter": "row.status != 'done'"
            }),
            ctx(),
        )
        .await;

    m.assert();
    assert!(result.success, "{:?}", result.error);
    assert!(!result.is_mock());
    let data = result.data.unwrap();
    assert_eq!(data["count"], 1);
    assert_eq!(
        data["rows"],
        json!([{"name": "Ann", "email": "ann@example.com", "status": "pending"}])
    );
}

#[tokio::test]
async fn sheets_append_posts_rows() {
    let m = mock("POST", Matcher::Regex("^/spreadsheets/sheet-2/values/Sheet1!A1:append".into()))
        .match_query(Matcher::UrlEncoded(
            "valueInputOption".into(),
            "USER_ENTERED".into(),
        ))
        .match_body(Matcher::Json(json!({"values": [["Ann", "ann@example.com"]]})))
        .with_status(200)
        .with_body(r#"{"updates": {"updatedRange": "Sheet1!A5:B5", "updatedRows": 1}}"#)
        .create();

    let tool = SheetsAppendTool::new(Some(sheets_config()));
    let result = tool
        .execute(
            json!({"spreadsheetId": "sheet-2", "values": ["Ann", "ann@example.com"]}),
            ctx(),
        )
        .await;

    m.assert();
    assert!(result.success, "{:?}", result.error);
    let data = result.data.unwrap();
    assert_eq!(data["updatedRange"], "Sheet1!A5:B5");
    assert_eq!(data["updatedRows"], 1);
}
