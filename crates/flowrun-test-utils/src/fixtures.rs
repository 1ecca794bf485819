//! Workflow graphs used across the engine and CLI tests.

use std::path::PathBuf;

use serde_json::json;

use flowrun_core::graph::{Edge, Node, TransformStep, WorkflowGraph};

/// Node type routed to a test tool by [`branching`]. Map it before running.
pub const RECORD_NODE: &str = "action.test.record";

/// trigger -> transform(trim name).
pub fn trim_name() -> WorkflowGraph {
    WorkflowGraph::new("wf_trim", "Trim name")
        .with_node(Node::trigger("t1"))
        .with_node(Node::transform(
            "x1",
            vec![TransformStep::Trim {
                fields: vec!["name".into()],
            }],
        ))
        .with_edge(Edge::new("e1", "t1", "x1"))
}

/// trigger -> action.whatsapp.send with interpolated props.
pub fn whatsapp_notify() -> WorkflowGraph {
    WorkflowGraph::new("wf_wa", "WhatsApp notify")
        .with_node(Node::trigger("t1"))
        .with_node(Node::new(
            "w1",
            "action.whatsapp.send",
            json!({"to": "{{phone}}", "message": "Hi {{name}}"}),
        ))
        .with_edge(Edge::new("e1", "t1", "w1"))
}

/// trigger -> bogus.type -> transform. The transform is only reachable through
/// the bogus node.
pub fn bogus_node() -> WorkflowGraph {
    WorkflowGraph::new("wf_bogus", "Bogus")
        .with_node(Node::trigger("t1"))
        .with_node(Node::new("b1", "bogus.type", json!({})))
        .with_node(Node::transform("after", vec![]))
        .with_edge(Edge::new("e1", "t1", "b1"))
        .with_edge(Edge::new("e2", "b1", "after"))
}

/// trigger -> condition(`expr`) fanning out to `yes` (when true), `no`
/// (when false) and `always` (unguarded). All three are [`RECORD_NODE`]s.
pub fn branching(expr: &str) -> WorkflowGraph {
    let record = |id: &str| Node::new(id, RECORD_NODE, json!({"branch": id}));
    WorkflowGraph::new("wf_branch", "Branching")
        .with_node(Node::trigger("t1"))
        .with_node(Node::condition("c1", expr))
        .with_node(record("yes"))
        .with_node(record("no"))
        .with_node(record("always"))
        .with_edge(Edge::new("e1", "t1", "c1"))
        .with_edge(Edge::new("e2", "c1", "yes").when("true"))
        .with_edge(Edge::new("e3", "c1", "no").when("false"))
        .with_edge(Edge::new("e4", "c1", "always"))
}

/// The lead clean-up workflow in its JSON wire form.
pub const CLEAN_AND_NOTIFY: &str = r#"{
  "id": "wf_clean_notify",
  "name": "Clean & Notify: WhatsApp + CRM sync",
  "nodes": [
    {"id": "t1", "type": "trigger.manual", "props": {"label": "Manual Trigger"}, "position": {"x": 100, "y": 100}},
    {"id": "x1", "type": "transform", "props": {"steps": [
      {"op": "trim", "fields": ["name", "email", "phone"]},
      {"op": "titleCase", "fields": ["name"]},
      {"op": "normalizePhone", "country": "MY", "field": "phone"},
      {"op": "dropInvalid", "rules": ["email:required:email"]}
    ]}, "position": {"x": 100, "y": 200}},
    {"id": "c1", "type": "condition", "props": {"expr": "len($) > 0"}, "position": {"x": 100, "y": 300}},
    {"id": "w1", "type": "action.whatsapp.send", "props": {
      "to": "{{data.0.phone}}",
      "message": "Hi {{data.0.name}}, thanks for your enquiry."
    }, "position": {"x": 50, "y": 400}},
    {"id": "n1", "type": "external.n8n", "props": {"workflowId": "wf-crm-sync", "secretRef": "N8N_DEFAULT"}, "position": {"x": 250, "y": 400}}
  ],
  "edges": [
    {"id": "e1", "source": "t1", "target": "x1"},
    {"id": "e2", "source": "x1", "target": "c1"},
    {"id": "e3", "source": "c1", "target": "w1", "when": "true"},
    {"id": "e4", "source": "c1", "target": "n1", "when": "true"}
  ],
  "version": 1
}"#;

pub fn clean_and_notify() -> WorkflowGraph {
    WorkflowGraph::from_json(CLEAN_AND_NOTIFY).unwrap()
}

/// Raw lead rows as they come off a sheet.
pub fn raw_leads() -> serde_json::Value {
    json!([
        {"name": "  ann LEE ", "email": "ann@example.com ", "phone": "012-345 6789"},
        {"name": "bo", "email": "not-an-email", "phone": "+60 11 222 3333"},
        {"name": "cy tan", "email": "", "phone": "0139998888"}
    ])
}

/// Write `graph` as JSON into a fresh temp dir and return its path. The dir is
/// returned too so the caller controls its lifetime.
pub fn write_workflow(graph: &WorkflowGraph) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workflow.json");
    std::fs::write(&path, serde_json::to_string_pretty(graph).unwrap()).unwrap();
    (dir, path)
}
