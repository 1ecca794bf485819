use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::RunRecorder;
use flowrun_core::types::{Outcome, Run, RunId, RunStatus, Step, StepId, StepLog, ToolExecution};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflow_runs (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        status TEXT NOT NULL,
        trigger_data TEXT NOT NULL,
        result TEXT,
        error TEXT,
        started_at TEXT NOT NULL,
        finished_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_runs_workflow
        ON workflow_runs(workflow_id, started_at);

    CREATE TABLE IF NOT EXISTS run_steps (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        run_id TEXT NOT NULL REFERENCES workflow_runs(id),
        node_id TEXT NOT NULL,
        node_type TEXT NOT NULL,
        status TEXT NOT NULL,
        input TEXT NOT NULL,
        output TEXT,
        error TEXT,
        logs TEXT NOT NULL DEFAULT '[]',
        started_at TEXT NOT NULL,
        finished_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_steps_run ON run_steps(run_id, seq);

    CREATE TABLE IF NOT EXISTS tool_executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        step_id TEXT NOT NULL,
        tool TEXT NOT NULL,
        params TEXT NOT NULL,
        response TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tool_exec_run ON tool_executions(run_id, id);";

/// SQLite-backed run recorder.
pub struct SqliteRecorder {
    conn: Mutex<Connection>,
}

impl SqliteRecorder {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlowError::Recorder(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| FlowError::Recorder(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| FlowError::Recorder(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| FlowError::Recorder(e.to_string()))?;

        debug!(path = %path.display(), "Run database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| FlowError::Recorder(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| FlowError::Recorder(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FlowError::Recorder(e.to_string()))
    }
}

impl SqliteRecorder {
    pub fn get_run(&self, run_id: &RunId) -> Result<Option<Run>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, workflow_id, status, trigger_data, result, error, started_at, finished_at
                 FROM workflow_runs WHERE id = ?1",
                params![run_id.0],
                RawRun::from_row,
            )
            .optional()
            .map_err(|e| FlowError::Recorder(e.to_string()))?;
        raw.map(RawRun::into_run).transpose()
    }

    /// Most recent runs first, optionally for one workflow.
    pub fn list_runs(&self, workflow_id: Option<&str>, limit: usize) -> Result<Vec<Run>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, workflow_id, status, trigger_data, result, error, started_at, finished_at
                 FROM workflow_runs
                 WHERE ?1 IS NULL OR workflow_id = ?1
                 ORDER BY started_at DESC, rowid DESC
                 LIMIT ?2",
            )
            .map_err(|e| FlowError::Recorder(e.to_string()))?;

        let rows = stmt
            .query_map(params![workflow_id, limit as i64], RawRun::from_row)
            .map_err(|e| FlowError::Recorder(e.to_string()))?;

        let mut runs = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| FlowError::Recorder(e.to_string()))?;
            runs.push(raw.into_run()?);
        }
        Ok(runs)
    }

    /// Steps of a run in execution order.
    pub fn steps_for_run(&self, run_id: &RunId) -> Result<Vec<Step>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, run_id, node_id, node_type, status, input, output, error, logs,
                        started_at, finished_at
                 FROM run_steps WHERE run_id = ?1 ORDER BY seq ASC",
            )
            .map_err(|e| FlowError::Recorder(e.to_string()))?;

        let rows = stmt
            .query_map(params![run_id.0], |row| {
                Ok(RawStep {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    node_id: row.get(2)?,
                    node_type: row.get(3)?,
                    status: row.get(4)?,
                    input: row.get(5)?,
                    output: row.get(6)?,
                    error: row.get(7)?,
                    logs: row.get(8)?,
                    started_at: row.get(9)?,
                    finished_at: row.get(10)?,
                })
            })
            .map_err(|e| FlowError::Recorder(e.to_string()))?;

        let mut steps = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| FlowError::Recorder(e.to_string()))?;
            steps.push(raw.into_step()?);
        }
        Ok(steps)
    }

    pub fn tool_executions_for_run(&self, run_id: &RunId) -> Result<Vec<ToolExecution>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, step_id, tool, params, response, status, created_at
                 FROM tool_executions WHERE run_id = ?1 ORDER BY id ASC",
            )
            .map_err(|e| FlowError::Recorder(e.to_string()))?;

        let rows = stmt
            .query_map(params![run_id.0], |row| {
                let run_id: String = row.get(0)?;
                let step_id: String = row.get(1)?;
                let tool: String = row.get(2)?;
                let params: String = row.get(3)?;
                let response: String = row.get(4)?;
                let status: String = row.get(5)?;
                let created_at: String = row.get(6)?;
                Ok((run_id, step_id, tool, params, response, status, created_at))
            })
            .map_err(|e| FlowError::Recorder(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (run_id, step_id, tool, params, response, status, created_at) =
                row.map_err(|e| FlowError::Recorder(e.to_string()))?;
            out.push(ToolExecution {
                run_id: RunId::from_string(run_id),
                step_id: StepId::from_string(step_id),
                tool,
                params: parse_json(&params)?,
                response: parse_json(&response)?,
                status: status.parse()?,
                created_at: parse_ts(&created_at),
            });
        }
        Ok(out)
    }
}

impl RunRecorder for SqliteRecorder {
    fn create_run(&self, workflow_id: &str, trigger_data: &Value) -> BoxFuture<'_, Result<RunId>> {
        let workflow_id = workflow_id.to_string();
        let trigger = trigger_data.to_string();

        Box::pin(async move {
            let run_id = RunId::new();
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO workflow_runs (id, workflow_id, status, trigger_data, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run_id.0,
                    workflow_id,
                    RunStatus::Running.as_str(),
                    trigger,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| FlowError::Recorder(e.to_string()))?;
            Ok(run_id)
        })
    }

    fn finish_run(&self, run_id: &RunId, outcome: Outcome) -> BoxFuture<'_, Result<()>> {
        let run_id = run_id.clone();

        Box::pin(async move {
            let status = outcome.status();
            let (result, error) = split_outcome(outcome);
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE workflow_runs
                     SET status = ?2, result = ?3, error = ?4, finished_at = ?5
                     WHERE id = ?1 AND status = 'running'",
                    params![run_id.0, status.as_str(), result, error, Utc::now().to_rfc3339()],
                )
                .map_err(|e| FlowError::Recorder(e.to_string()))?;
            if changed == 0 {
                return Err(not_running(&conn, "workflow_runs", "run", &run_id.0));
            }
            Ok(())
        })
    }

    fn create_step(
        &self,
        run_id: &RunId,
        node_id: &str,
        node_type: &str,
        input: &Value,
    ) -> BoxFuture<'_, Result<StepId>> {
        let run_id = run_id.clone();
        let node_id = node_id.to_string();
        let node_type = node_type.to_string();
        let input = input.to_string();

        Box::pin(async move {
            let step_id = StepId::new();
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO run_steps (id, run_id, node_id, node_type, status, input, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    step_id.0,
                    run_id.0,
                    node_id,
                    node_type,
                    RunStatus::Running.as_str(),
                    input,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| FlowError::Recorder(e.to_string()))?;
            Ok(step_id)
        })
    }

    fn finish_step(&self, step_id: &StepId, outcome: Outcome) -> BoxFuture<'_, Result<()>> {
        let step_id = step_id.clone();

        Box::pin(async move {
            let status = outcome.status();
            let (output, error) = split_outcome(outcome);
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE run_steps
                     SET status = ?2, output = ?3, error = ?4, finished_at = ?5
                     WHERE id = ?1 AND status = 'running'",
                    params![step_id.0, status.as_str(), output, error, Utc::now().to_rfc3339()],
                )
                .map_err(|e| FlowError::Recorder(e.to_string()))?;
            if changed == 0 {
                return Err(not_running(&conn, "run_steps", "step", &step_id.0));
            }
            Ok(())
        })
    }

    fn append_step_log(&self, step_id: &StepId, message: &str) -> BoxFuture<'_, Result<()>> {
        let step_id = step_id.clone();
        let entry = StepLog::now(message);

        Box::pin(async move {
            let conn = self.lock()?;
            let logs: Option<String> = conn
                .query_row(
                    "SELECT logs FROM run_steps WHERE id = ?1",
                    params![step_id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| FlowError::Recorder(e.to_string()))?;
            let logs = logs.ok_or_else(|| {
                FlowError::Recorder(format!("step not found: {}", step_id))
            })?;

            let mut entries: Vec<StepLog> = serde_json::from_str(&logs)?;
            entries.push(entry);
            conn.execute(
                "UPDATE run_steps SET logs = ?2 WHERE id = ?1",
                params![step_id.0, serde_json::to_string(&entries)?],
            )
            .map_err(|e| FlowError::Recorder(e.to_string()))?;
            Ok(())
        })
    }

    fn record_tool_execution(&self, execution: ToolExecution) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO tool_executions
                    (run_id, step_id, tool, params, response, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    execution.run_id.0,
                    execution.step_id.0,
                    execution.tool,
                    execution.params.to_string(),
                    execution.response.to_string(),
                    execution.status.as_str(),
                    execution.created_at.to_rfc3339()
                ],
            )
            .map_err(|e| FlowError::Recorder(e.to_string()))?;
            Ok(())
        })
    }
}

/// JSON text for the completed value, or the failure message.
fn split_outcome(outcome: Outcome) -> (Option<String>, Option<String>) {
    match outcome {
        Outcome::Completed(value) => (Some(value.to_string()), None),
        Outcome::Failed(message) => (None, Some(message)),
    }
}

fn not_running(conn: &Connection, table: &str, what: &str, id: &str) -> FlowError {
    let status: Option<String> = conn
        .query_row(
            &format!("SELECT status FROM {} WHERE id = ?1", table),
            params![id],
            |row| row.get(0),
        )
        .optional()
        .unwrap_or(None);
    match status {
        Some(s) => FlowError::Recorder(format!("{} {} is already {}", what, id, s)),
        None => FlowError::Recorder(format!("{} not found: {}", what, id)),
    }
}

struct RawRun {
    id: String,
    workflow_id: String,
    status: String,
    trigger_data: String,
    result: Option<String>,
    error: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl RawRun {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            status: row.get(2)?,
            trigger_data: row.get(3)?,
            result: row.get(4)?,
            error: row.get(5)?,
            started_at: row.get(6)?,
            finished_at: row.get(7)?,
        })
    }

    fn into_run(self) -> Result<Run> {
        Ok(Run {
            id: RunId::from_string(self.id),
            workflow_id: self.workflow_id,
            status: self.status.parse()?,
            trigger_data: parse_json(&self.trigger_data)?,
            result: self.result.as_deref().map(parse_json).transpose()?,
            error: self.error,
            started_at: parse_ts(&self.started_at),
            finished_at: self.finished_at.as_deref().map(parse_ts),
        })
    }
}

struct RawStep {
    id: String,
    run_id: String,
    node_id: String,
    node_type: String,
    status: String,
    input: String,
    output: Option<String>,
    error: Option<String>,
    logs: String,
    started_at: String,
    finished_at: Option<String>,
}

impl RawStep {
    fn into_step(self) -> Result<Step> {
        Ok(Step {
            id: StepId::from_string(self.id),
            run_id: RunId::from_string(self.run_id),
            node_id: self.node_id,
            node_type: self.node_type,
            status: self.status.parse()?,
            input: parse_json(&self.input)?,
            output: self.output.as_deref().map(parse_json).transpose()?,
            error: self.error,
            logs: serde_json::from_str(&self.logs)?,
            started_at: parse_ts(&self.started_at),
            finished_at: self.finished_at.as_deref().map(parse_ts),
        })
    }
}

fn parse_json(text: &str) -> Result<Value> {
    Ok(serde_json::from_str(text)?)
}

fn parse_ts(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_lifecycle() {
        let rec = SqliteRecorder::in_memory().unwrap();
        let run_id = rec.create_run("wf-1", &json!({"name": "x"})).await.unwrap();

        let run = rec.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.trigger_data, json!({"name": "x"}));
        assert!(run.finished_at.is_none());

        rec.finish_run(&run_id, Outcome::Completed(json!({"ok": true})))
            .await
            .unwrap();
        let run = rec.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.result, Some(json!({"ok": true})));
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_run_is_immutable() {
        let rec = SqliteRecorder::in_memory().unwrap();
        let run_id = rec.create_run("wf-1", &json!({})).await.unwrap();
        rec.finish_run(&run_id, Outcome::Failed("boom".into()))
            .await
            .unwrap();

        let err = rec
            .finish_run(&run_id, Outcome::Completed(json!(null)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already failed"));

        let run = rec.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_step_logs_and_tool_executions() {
        let rec = SqliteRecorder::in_memory().unwrap();
        let run_id = rec.create_run("wf-1", &json!({})).await.unwrap();
        let step = rec
            .create_step(&run_id, "n1", "action.email.send", &json!({"a": 1}))
            .await
            .unwrap();
        rec.append_step_log(&step, "first").await.unwrap();
        rec.append_step_log(&step, "second").await.unwrap();
        rec.record_tool_execution(ToolExecution {
            run_id: run_id.clone(),
            step_id: step.clone(),
            tool: "email.send".into(),
            params: json!({"to": "a@b.co"}),
            response: json!({"mock": true}),
            status: RunStatus::Completed,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        rec.finish_step(&step, Outcome::Completed(json!({"sent": true})))
            .await
            .unwrap();

        let steps = rec.steps_for_run(&run_id).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].node_type, "action.email.send");
        assert_eq!(steps[0].status, RunStatus::Completed);
        let messages: Vec<_> = steps[0].logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);

        let execs = rec.tool_executions_for_run(&run_id).unwrap();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].tool, "email.send");
        assert_eq!(execs[0].response, json!({"mock": true}));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_errors() {
        let rec = SqliteRecorder::in_memory().unwrap();
        let missing = StepId::new();
        assert!(rec.append_step_log(&missing, "x").await.is_err());
        let err = rec
            .finish_step(&missing, Outcome::Failed("x".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(rec.get_run(&RunId::new()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runs.db");
        {
            let rec = SqliteRecorder::open(&path).unwrap();
            rec.create_run("wf-a", &json!({})).await.unwrap();
            rec.create_run("wf-b", &json!({})).await.unwrap();
            rec.create_run("wf-a", &json!({})).await.unwrap();
        }

        let rec = SqliteRecorder::open(&path).unwrap();
        assert_eq!(rec.list_runs(None, 10).unwrap().len(), 3);
        assert_eq!(rec.list_runs(Some("wf-a"), 10).unwrap().len(), 2);
        assert_eq!(rec.list_runs(None, 1).unwrap().len(), 1);
    }
}
