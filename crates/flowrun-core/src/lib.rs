pub mod config;
pub mod error;
pub mod expr;
pub mod graph;
pub mod template;
pub mod traits;
pub mod types;

pub use config::{AppConfig, ToolsConfig};
pub use error::{FlowError, Result};
pub use graph::{Edge, Node, NodeKind, WorkflowGraph};
pub use types::*;
