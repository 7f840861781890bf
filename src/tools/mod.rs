//! Tool registry and dispatch.
//!
//! A tool is a name, a JSON schema for listing, and a handler. Arguments are
//! decoded once at the dispatch boundary into the handler's typed struct;
//! arguments that don't fit become an error-flagged [`ToolResult`], not a
//! dispatch failure. Only an unknown tool name fails dispatch itself.

mod logic;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::prolog::QueryContext;

pub use logic::register_logic_tools;

/// Tool as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

/// Tool-level result envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Raw outcome fields alongside the human-readable text
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
            structured: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured = Some(value);
        self
    }

    /// All text content joined; handy for logs and tests.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|Content::Text { text }| text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

type Handler = Box<dyn Fn(Value, &QueryContext) -> ToolResult + Send + Sync>;

struct Registered {
    definition: ToolDefinition,
    handler: Handler,
}

/// Ordered set of tools; listing order is registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Registered>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool whose arguments decode into `A`.
    ///
    /// A later registration with the same name replaces the earlier one.
    pub fn register<A, F>(&mut self, name: &str, description: &str, input_schema: Value, handler: F)
    where
        A: DeserializeOwned,
        F: Fn(A, &QueryContext) -> ToolResult + Send + Sync + 'static,
    {
        let tool = name.to_string();
        let handler: Handler = Box::new(move |arguments, ctx| {
            // Absent arguments behave like an empty object
            let arguments = match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            };
            match serde_json::from_value::<A>(arguments) {
                Ok(args) => handler(args, ctx),
                Err(e) => ToolResult::error(format!("Error: invalid arguments for {}: {}", tool, e)),
            }
        });

        let registered = Registered {
            definition: ToolDefinition {
                name: name.to_string(),
                description: description.to_string(),
                input_schema,
            },
            handler,
        };

        match self.tools.iter_mut().find(|t| t.definition.name == name) {
            Some(existing) => *existing = registered,
            None => self.tools.push(registered),
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.definition.name == name)
    }

    pub fn dispatch(
        &self,
        name: &str,
        arguments: Value,
        ctx: &QueryContext,
    ) -> Result<ToolResult, DispatchError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.definition.name == name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;
        tracing::debug!(tool = name, "dispatching tool call");
        Ok((tool.handler)(arguments, ctx))
    }
}
