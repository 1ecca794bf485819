//! Sandboxed condition expressions.
//!
//! A small parsed grammar evaluated against JSON data: comparisons, `&&`/`||`/`!`,
//! number and string literals, dotted/indexed access from the root `$`, and a
//! `len(...)` helper. Nothing outside the data passed in is reachable.
//!
//! ```text
//! len($.cleanRows) > 0
//! $.rows && $.rows.length > 0
//! status == 'pending'
//! {{lead.priority}} === "high"
//! ```

mod eval;
mod lexer;
mod parser;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub use eval::is_truthy;
pub use parser::{parse, parse_path, BinaryOp, Expr};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("evaluation error: {0}")]
    Eval(String),
}

impl ExprError {
    pub(crate) fn parse(pos: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            pos,
            message: message.into(),
        }
    }
}

/// Names visible to an expression. `$` is always the root.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    root: &'a Value,
    bindings: Vec<(&'a str, &'a Value)>,
}

impl<'a> Scope<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self {
            root,
            bindings: Vec::new(),
        }
    }

    /// Bind an extra name, e.g. `row` for per-row filters.
    pub fn bind(mut self, name: &'a str, value: &'a Value) -> Self {
        self.bindings.push((name, value));
        self
    }

    pub fn root(&self) -> &'a Value {
        self.root
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&'a Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

/// Parse and evaluate `src`, returning the resulting value.
pub fn evaluate(src: &str, scope: &Scope<'_>) -> Result<Value, ExprError> {
    parse(src)?.eval(scope)
}

/// Evaluate `src` as a boolean condition with `root` bound to `$`.
///
/// Parse and evaluation errors are logged and count as `false`.
pub fn evaluate_condition(src: &str, root: &Value) -> bool {
    evaluate_condition_in(src, &Scope::new(root))
}

/// Like [`evaluate_condition`] but with a caller-built scope.
pub fn evaluate_condition_in(src: &str, scope: &Scope<'_>) -> bool {
    match evaluate(src, scope) {
        Ok(value) => is_truthy(&value),
        Err(e) => {
            warn!(expr = %src, error = %e, "Expression evaluation failed, treating as false");
            false
        }
    }
}
