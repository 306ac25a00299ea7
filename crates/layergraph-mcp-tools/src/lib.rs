// ABOUTME: Tool layer over the layer graph (schemas, executor, result cache)
// ABOUTME: Provides GraphToolExecutor and GraphToolSchemas for the CLI serve loop and other callers

pub mod graph_tool_executor;
pub mod graph_tool_schemas;

pub use graph_tool_executor::*;
pub use graph_tool_schemas::*;
