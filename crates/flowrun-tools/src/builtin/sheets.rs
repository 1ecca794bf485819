//! Google Sheets read and append over the Sheets v4 values API.

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use flowrun_core::config::{configured, SheetsConfig, SheetsCredential};
use flowrun_core::error::{FlowError, Result};
use flowrun_core::expr::{self, is_truthy, Scope};
use flowrun_core::traits::Tool;
use flowrun_core::types::{ToolContext, ToolResult, Validation};

use super::{finish, has, http_client, read_body, request_failed, text_param};

const DEFAULT_READ_RANGE: &str = "Sheet1!A1:Z1000";
const DEFAULT_APPEND_RANGE: &str = "Sheet1!A1";

/// Reads a sheet range, optionally mapping the header row onto objects and
/// filtering rows with an expression where `row` is bound to each row.
pub struct SheetsReadTool {
    config: Option<SheetsConfig>,
    client: reqwest::Client,
}

/// Appends one or more rows to a sheet range.
pub struct SheetsAppendTool {
    config: Option<SheetsConfig>,
    client: reqwest::Client,
}

/// Spreadsheet id from a `.../d/<id>/...` URL, or the reference itself.
pub fn extract_spreadsheet_id(reference: &str) -> String {
    if let Some(idx) = reference.find("/d/") {
        let id: String = reference[idx + 3..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if !id.is_empty() {
            return id;
        }
    }
    reference.to_string()
}

fn spreadsheet_id(params: &Value) -> Option<String> {
    text_param(params, &["spreadsheetId"])
        .or_else(|| text_param(params, &["sheet"]).map(|s| extract_spreadsheet_id(&s)))
}

/// Resolve which credential a call uses. `None` means mock mode.
fn credential<'a>(config: Option<&'a SheetsConfig>, params: &Value) -> Option<&'a SheetsCredential> {
    let name = text_param(params, &["credentialRef"]);
    config?.credential(name.as_deref())
}

fn values_url(base: &str, id: &str, range: &str, suffix: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base.trim_end_matches('/'))
        .map_err(|e| FlowError::Config(format!("google_sheets api_base: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| FlowError::Config("google_sheets api_base cannot be a base URL".into()))?
        .extend(["spreadsheets", id, "values"])
        .push(&format!("{}{}", range, suffix));
    Ok(url)
}

fn authorize(req: reqwest::RequestBuilder, cred: &SheetsCredential) -> reqwest::RequestBuilder {
    match (configured(&cred.access_token), configured(&cred.api_key)) {
        (Some(token), _) => req.bearer_auth(token),
        (None, Some(key)) => req.query(&[("key", key)]),
        (None, None) => req,
    }
}

/// Turn a values grid into header-keyed objects. Missing cells become "".
pub fn rows_to_records(grid: &[Value]) -> Vec<Value> {
    let Some((header, body)) = grid.split_first() else {
        return Vec::new();
    };
    let headers: Vec<String> = header
        .as_array()
        .map(|cells| cells.iter().map(cell_text).collect())
        .unwrap_or_default();

    body.iter()
        .map(|row| {
            let cells = row.as_array();
            let mut obj = Map::new();
            for (i, h) in headers.iter().enumerate() {
                let cell = cells
                    .and_then(|c| c.get(i))
                    .filter(|v| is_truthy(v))
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                obj.insert(h.clone(), cell);
            }
            Value::Object(obj)
        })
        .collect()
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Keep rows for which `filter` holds. Inside the filter the row is both the
/// root and the `row` binding, so `status == 'x'`, `row.status == 'x'` and
/// `{{status}} == 'x'` all read the same field. A filter that fails to parse
/// or evaluate leaves the rows untouched.
pub fn apply_filter(rows: Vec<Value>, filter: &str) -> Vec<Value> {
    let parsed = match expr::parse(filter) {
        Ok(p) => p,
        Err(e) => {
            warn!(filter = %filter, error = %e, "Invalid row filter, keeping all rows");
            return rows;
        }
    };

    let mut keep = Vec::with_capacity(rows.len());
    for row in &rows {
        let scope = Scope::new(row).bind("row", row);
        match parsed.eval(&scope) {
            Ok(v) => keep.push(is_truthy(&v)),
            Err(e) => {
                warn!(filter = %filter, error = %e, "Row filter failed, keeping all rows");
                return rows;
            }
        }
    }
    rows.into_iter()
        .zip(keep)
        .filter_map(|(row, k)| k.then_some(row))
        .collect()
}

fn sample_grid() -> Vec<Value> {
    vec![
        json!(["name", "email", "phone", "status"]),
        json!(["  ali ahmad ", "ali@example.com", "012-345 6789", "pending"]),
        json!(["Siti Rahman", "siti@example", "+60 13 987 6543", "done"]),
        json!(["mei ling", "mei@example.com", "0112223333"]),
    ]
}

impl SheetsReadTool {
    pub fn new(config: Option<SheetsConfig>) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    async fn read(&self, params: &Value, logs: &mut Vec<String>) -> Result<Value> {
        let id = spreadsheet_id(params).unwrap_or_default();
        let range = text_param(params, &["range"]).unwrap_or_else(|| DEFAULT_READ_RANGE.to_string());

        let (grid, mock) = match (self.config.as_ref(), credential(self.config.as_ref(), params)) {
            (Some(cfg), Some(cred)) => {
                logs.push(format!("Reading from {} range {}", id, range));
                let url = values_url(&cfg.api_base, &id, &range, "")?;
                debug!(url = %url, "Reading sheet values");
                let resp = authorize(self.client.get(url), cred)
                    .send()
                    .await
                    .map_err(|e| request_failed("google_sheets", e))?;
                let body = read_body("google_sheets", resp).await?;
                let values = body
                    .get("values")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                (values, false)
            }
            _ => {
                logs.push("Google Sheets credentials not configured - using mock mode".to_string());
                logs.push(format!("[MOCK MODE] Would read {} from {}", range, id));
                (sample_grid(), true)
            }
        };
        logs.push(format!("Read {} rows", grid.len()));

        let has_headers = params.get("hasHeaders").and_then(Value::as_bool).unwrap_or(true);
        let mut rows = if has_headers && !grid.is_empty() {
            rows_to_records(&grid)
        } else {
            grid
        };

        if let Some(filter) = params.get("filter").and_then(Value::as_str).filter(|f| !f.trim().is_empty()) {
            let before = rows.len();
            rows = apply_filter(rows, filter);
            logs.push(format!("Filtered {} rows to {} rows", before, rows.len()));
        }

        let mut data = json!({ "count": rows.len(), "rows": rows });
        if mock {
            data["mock"] = Value::Bool(true);
        }
        Ok(data)
    }
}

impl Tool for SheetsReadTool {
    fn name(&self) -> &str {
        "google_sheets.read"
    }

    fn description(&self) -> &str {
        "Read data from Google Sheets"
    }

    fn validate_params(&self, params: &Value) -> Validation {
        let mut v = Validation::ok();
        v.require(
            has(params, "sheet") || has(params, "spreadsheetId"),
            "Missing required parameter: sheet or spreadsheetId",
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
            let outcome = self.read(&params, &mut logs).await;
            finish(outcome, logs)
        })
    }

    fn is_configured(&self) -> bool {
        self.config
            .as_ref()
            .is_some_and(|c| c.credentials.values().any(SheetsCredential::is_usable))
    }
}

/// Normalize `values` into a list of rows: a flat list is one row, a list of
/// lists is many, and a record contributes its values.
fn append_rows(values: &Value) -> Vec<Value> {
    match values {
        Value::Array(items) if items.iter().all(Value::is_array) => items.clone(),
        Value::Array(items) => vec![Value::Array(items.clone())],
        Value::Object(map) => vec![Value::Array(map.values().cloned().collect())],
        Value::Null => Vec::new(),
        scalar => vec![json!([scalar])],
    }
}

impl SheetsAppendTool {
    pub fn new(config: Option<SheetsConfig>) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    async fn append(&self, params: &Value, logs: &mut Vec<String>) -> Result<Value> {
        let id = spreadsheet_id(params).unwrap_or_default();
        let range = text_param(params, &["range"]).unwrap_or_else(|| DEFAULT_APPEND_RANGE.to_string());
        let rows = append_rows(params.get("values").unwrap_or(&Value::Null));

        let (Some(cfg), Some(cred)) = (self.config.as_ref(), credential(self.config.as_ref(), params))
        else {
            logs.push("Google Sheets credentials not configured - using mock mode".to_string());
            logs.push(format!(
                "[MOCK MODE] Would append {} rows to {} in {}",
                rows.len(),
                range,
                id
            ));
            return Ok(json!({
                "spreadsheetId": id,
                "updatedRange": range,
                "updatedRows": rows.len(),
                "mock": true,
            }));
        };

        logs.push(format!("Appending {} rows to {} range {}", rows.len(), id, range));
        let mut url = values_url(&cfg.api_base, &id, &range, ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");

        let resp = authorize(self.client.post(url), cred)
            .json(&json!({ "values": rows }))
            .send()
            .await
            .map_err(|e| request_failed("google_sheets", e))?;
        let body = read_body("google_sheets", resp).await?;

        let updates = body.get("updates").cloned().unwrap_or(Value::Null);
        logs.push(format!(
            "Appended rows: {}",
            cell_text(updates.get("updatedRange").unwrap_or(&Value::Null))
        ));
        Ok(json!({
            "spreadsheetId": id,
            "updatedRange": updates.get("updatedRange").cloned().unwrap_or(Value::Null),
            "updatedRows": updates.get("updatedRows").cloned().unwrap_or(Value::Null),
        }))
    }
}

impl Tool for SheetsAppendTool {
    fn name(&self) -> &str {
        "google_sheets.append"
    }

    fn description(&self) -> &str {
        "Append rows to Google Sheets"
    }

    fn validate_params(&self, params: &Value) -> Validation {
        let mut v = Validation::ok();
        v.require(
            has(params, "sheet") || has(params, "spreadsheetId"),
            "Missing required parameter: sheet or spreadsheetId",
        );
        v.require(
            params.get("values").is_some_and(|v| !v.is_null()),
            "Missing required parameter: values",
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
            let outcome = self.append(&params, &mut logs).await;
            finish(outcome, logs)
        })
    }

    fn is_configured(&self) -> bool {
        self.config
            .as_ref()
            .is_some_and(|c| c.credentials.values().any(SheetsCredential::is_usable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_core::types::RunId;

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: "u1".into(),
            run_id: RunId::new(),
            node_id: "sheet".into(),
        }
    }

    #[test]
    fn test_extract_spreadsheet_id() {
        assert_eq!(
            extract_spreadsheet_id("https://docs.google.com/spreadsheets/d/1AbC-d_9/edit#gid=0"),
            "1AbC-d_9"
        );
        assert_eq!(extract_spreadsheet_id("1AbC"), "1AbC");
    }

    #[test]
    fn test_rows_to_records_pads_missing_cells() {
        let grid = vec![json!(["a", "b"]), json!(["1"]), json!(["2", "3", "extra"])];
        assert_eq!(
            rows_to_records(&grid),
            vec![json!({"a": "1", "b": ""}), json!({"a": "2", "b": "3"})]
        );
    }

    #[test]
    fn test_filter_forms() {
        let rows = vec![json!({"status": "pending"}), json!({"status": "done"})];
        for f in ["status == 'pending'", "row.status == 'pending'", "{{status}} == 'pending'"] {
            assert_eq!(apply_filter(rows.clone(), f), vec![json!({"status": "pending"})]);
        }
        assert_eq!(apply_filter(rows.clone(), "status ="), rows);
    }

    #[tokio::test]
    async fn test_mock_read_maps_and_filters() {
        let tool = SheetsReadTool::new(None);
        let result = tool
            .execute(
                json!({"sheet": "https://docs.google.com/spreadsheets/d/abc/edit", "filter": "status == 'pending'"}),
                ctx(),
            )
            .await;
        assert!(result.success);
        assert!(result.is_mock());
        let data = result.data.unwrap();
        assert_eq!(data["count"], 1);
        assert_eq!(data["rows"][0]["email"], "ali@example.com");
        assert!(result.logs.contains(&"Filtered 3 rows to 1 rows".to_string()));
    }

    #[tokio::test]
    async fn test_mock_read_without_headers() {
        let tool = SheetsReadTool::new(None);
        let result = tool
            .execute(json!({"spreadsheetId": "abc", "hasHeaders": false}), ctx())
            .await;
        let data = result.data.unwrap();
        assert_eq!(data["count"], 4);
        assert_eq!(data["rows"][0], json!(["name", "email", "phone", "status"]));
    }

    #[tokio::test]
    async fn test_read_requires_sheet() {
        let tool = SheetsReadTool::new(None);
        let result = tool.execute(json!({"range": "A1:B2"}), ctx()).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Missing required parameter: sheet or spreadsheetId")
        );
    }

    #[test]
    fn test_append_rows_shapes() {
        assert_eq!(append_rows(&json!([1, 2])), vec![json!([1, 2])]);
        assert_eq!(append_rows(&json!([[1], [2]])), vec![json!([1]), json!([2])]);
        assert_eq!(append_rows(&json!({"a": 1, "b": 2})), vec![json!([1, 2])]);
    }

    #[tokio::test]
    async fn test_mock_append() {
        let tool = SheetsAppendTool::new(None);
        let result = tool
            .execute(json!({"spreadsheetId": "abc", "values": [["x", "y"], ["z", "w"]]}), ctx())
            .await;
        assert!(result.success);
        assert!(result.is_mock());
        assert_eq!(result.data.unwrap()["updatedRows"], 2);
    }
}
