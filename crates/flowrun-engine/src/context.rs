use std::collections::HashMap;

use serde_json::Value;

/// Per-run record of what each node produced.
///
/// Owned by a single run and dropped when it finishes. A node visited twice
/// keeps its latest output.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    trigger_data: Value,
    outputs: HashMap<String, Value>,
    order: Vec<String>,
}

impl ExecutionContext {
    pub fn new(trigger_data: Value) -> Self {
        Self {
            trigger_data,
            ..Default::default()
        }
    }

    pub fn trigger_data(&self) -> &Value {
        &self.trigger_data
    }

    /// Store a node's output.
    pub fn record(&mut self, node_id: impl Into<String>, output: Value) {
        let node_id = node_id.into();
        self.order.push(node_id.clone());
        self.outputs.insert(node_id, output);
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    /// Node ids in the order they completed, repeats included.
    pub fn completed(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_write_wins() {
        let mut ctx = ExecutionContext::new(json!({"name": "Ann"}));
        assert!(ctx.is_empty());
        ctx.record("t1", json!({"name": "Ann"}));
        ctx.record("x1", json!(1));
        ctx.record("x1", json!(2));

        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.output("x1"), Some(&json!(2)));
        assert_eq!(ctx.completed(), ["t1", "x1", "x1"]);
        assert_eq!(ctx.trigger_data()["name"], "Ann");
        assert!(ctx.output("missing").is_none());
    }
}
