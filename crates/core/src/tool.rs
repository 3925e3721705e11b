//! Tool seam: calls requested by the model, the invoker that resolves and
//! executes them, and an in-process registry implementation.
//!
//! The invoker is deliberately two-step (`resolve` then `execute`) so that a
//! backend serving many tools (an MCP-style client) can be looked up once by
//! tool name and then asked to run that named tool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;

/// A complete, executable tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID assigned by the provider (or synthesized when absent)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Parsed argument mapping
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    /// Arguments rendered back to compact JSON text.
    pub fn arguments_json(&self) -> String {
        serde_json::Value::Object(self.arguments.clone()).to_string()
    }
}

/// The textual result of an executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The call ID this result answers
    pub call_id: String,

    /// The tool that produced it
    pub name: String,

    /// Output text fed back to the model
    pub output: String,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Something that can run a named tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<String, ToolError>;
}

/// The tool-invocation backend consumed by the turn controller.
pub trait ToolInvoker: Send + Sync {
    /// Definitions advertised to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Find the executor serving `tool_name`.
    fn resolve(&self, tool_name: &str) -> std::result::Result<Arc<dyn ToolExecutor>, ToolError>;
}

/// A single in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "current_time").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn call(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Adapts a registered [`Tool`] to the executor interface.
struct RegisteredTool(Arc<dyn Tool>);

#[async_trait]
impl ToolExecutor for RegisteredTool {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<String, ToolError> {
        if tool_name != self.0.name() {
            return Err(ToolError::NotFound(tool_name.to_string()));
        }
        self.0.call(arguments).await
    }
}

/// A registry of in-process tools, usable as a [`ToolInvoker`].
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolInvoker for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    fn resolve(&self, tool_name: &str) -> std::result::Result<Arc<dyn ToolExecutor>, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        Ok(Arc::new(RegisteredTool(Arc::clone(tool))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn call(
            &self,
            arguments: &serde_json::Map<String, serde_json::Value>,
        ) -> std::result::Result<String, ToolError> {
            Ok(arguments
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string())
        }
    }

    fn args(text: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("text".into(), serde_json::Value::String(text.into()));
        map
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn resolve_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let executor = registry.resolve("echo").unwrap();
        let out = executor.execute("echo", &args("hello world")).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn resolve_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry.resolve("nonexistent").err().unwrap();
        assert!(matches!(err, ToolError::NotFound(name) if name == "nonexistent"));
    }

    #[test]
    fn arguments_json_is_compact_object() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: args("hi"),
        };
        assert_eq!(call.arguments_json(), r#"{"text":"hi"}"#);
    }
}
