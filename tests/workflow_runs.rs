use std::sync::Arc;

use serde_json::json;

use flowrun_core::config::ToolsConfig;
use flowrun_core::graph::WorkflowGraph;
use flowrun_core::types::RunStatus;
use flowrun_engine::WorkflowEngine;
use flowrun_store::SqliteRecorder;
use flowrun_test_utils::fixtures;
use flowrun_tools::ToolRegistry;

#[tokio::test]
async fn test_workflow_file_runs_against_on_disk_store() {
    let graph = fixtures::clean_and_notify();
    let (dir, path) = fixtures::write_workflow(&graph);
    let loaded = WorkflowGraph::load(&path).expect("load workflow");
    assert!(loaded.validate().is_empty(), "{:?}", loaded.validate());

    let db_path = dir.path().join("runs.db");
    let recorder = Arc::new(SqliteRecorder::open(&db_path).expect("open store"));
    let tools = Arc::new(ToolRegistry::with_defaults(&ToolsConfig::default()));
    let engine = WorkflowEngine::new(tools, recorder.clone());

    let summary = engine
        .execute(&loaded.id, "u1", &loaded, fixtures::raw_leads())
        .await
        .expect("run completes");
    assert_eq!(summary.status, RunStatus::Completed);
    drop(engine);
    drop(recorder);

    // A fresh handle sees everything the run recorded.
    let reopened = SqliteRecorder::open(&db_path).expect("reopen store");
    let runs = reopened
        .list_runs(Some("wf_clean_notify"), 10)
        .expect("list runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, summary.run_id);
    assert_eq!(runs[0].trigger_data, fixtures::raw_leads());

    let steps = reopened.steps_for_run(&summary.run_id).expect("steps");
    assert_eq!(steps.len(), 5);
    assert!(steps.iter().all(|s| s.status == RunStatus::Completed));
    assert!(steps.iter().all(|s| !s.logs.is_empty()));

    let executions = reopened
        .tool_executions_for_run(&summary.run_id)
        .expect("tool executions");
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|e| e.response["mock"] == json!(true)));
}

fn demo(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name)
}

#[tokio::test]
async fn test_demo_workflows_run_in_mock_mode() {
    let tools = Arc::new(ToolRegistry::with_defaults(&ToolsConfig::default()));
    let recorder = Arc::new(SqliteRecorder::in_memory().expect("open store"));
    let engine = WorkflowEngine::new(tools, recorder.clone());

    let leads: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(demo("leads.json")).unwrap()).unwrap();
    let clean = WorkflowGraph::load(&demo("clean_and_notify.json")).expect("load demo");
    assert!(clean.validate().is_empty());
    let summary = engine
        .execute(&clean.id, "u1", &clean, leads.clone())
        .await
        .expect("clean and notify completes");
    assert_eq!(summary.result, leads);

    let digest = WorkflowGraph::load(&demo("leads_digest.json")).expect("load demo");
    assert!(digest.validate().is_empty());
    let summary = engine
        .execute(&digest.id, "u1", &digest, json!({}))
        .await
        .expect("digest completes");

    let steps = recorder.steps_for_run(&summary.run_id).unwrap();
    let node_ids: Vec<&str> = steps.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(node_ids, vec!["t1", "s1", "c1", "e1"]);

    let executions = recorder.tool_executions_for_run(&summary.run_id).unwrap();
    assert_eq!(executions[0].tool, "google_sheets.read");
    assert_eq!(executions[1].tool, "email.send");
    assert_eq!(executions[1].params["subject"], "1 pending leads");
    assert_eq!(executions[1].response["accepted"], json!(["sales@example.com"]));

    let email_logs: Vec<&str> = steps[3].logs.iter().map(|l| l.message.as_str()).collect();
    assert!(email_logs.contains(&"Attached CSV file"));
}

#[tokio::test]
async fn test_failed_run_is_listed_with_error() {
    let (dir, path) = fixtures::write_workflow(&fixtures::bogus_node());
    let graph = WorkflowGraph::load(&path).expect("load workflow");
    assert_eq!(graph.validate().len(), 1);

    let recorder = Arc::new(SqliteRecorder::open(&dir.path().join("runs.db")).expect("open store"));
    let engine = WorkflowEngine::new(Arc::new(ToolRegistry::new()), recorder.clone());

    let err = engine
        .execute("wf_bogus", "u1", &graph, json!({}))
        .await
        .unwrap_err();
    let run_id = err.run_id().cloned().expect("run id");

    let runs = recorder.list_runs(None, 10).expect("list runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, run_id);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].error.as_deref(), Some("Unknown node type: bogus.type"));
}
