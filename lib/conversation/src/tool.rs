//! Tool registry for the dialog.
//!
//! One catalog of tools is shared by both sides. Each tool has a single
//! definition that is rendered into either vendor's declaration shape, and
//! a handler that runs against the side that called it and the run state.

use crate::error::ToolError;
use crate::state::RunState;
use async_trait::async_trait;
use colloquy_core::Side;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Definition of a tool available during the dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Contract shown to the models.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: JsonValue,
    /// Whether the OpenAI side enforces the schema strictly.
    pub strict: bool,
}

impl ToolDefinition {
    /// Creates a tool that takes no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({ "type": "object", "properties": {}, "required": [] }),
            strict: true,
        }
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }

    /// Relaxes strict schema enforcement, for tools with optional arguments.
    #[must_use]
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Renders the OpenAI function-tool declaration.
    #[must_use]
    pub fn to_openai(&self) -> JsonValue {
        let mut parameters = self.parameters.clone();
        if let Some(object) = parameters.as_object_mut() {
            object.insert("additionalProperties".to_string(), JsonValue::Bool(false));
        }
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": parameters,
            "strict": self.strict,
        })
    }

    /// Renders the Anthropic tool declaration.
    #[must_use]
    pub fn to_anthropic(&self) -> JsonValue {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters,
        })
    }
}

/// What a handler sees of the run.
pub struct ToolContext<'a> {
    /// The side that called the tool.
    pub side: Side,
    /// The run state.
    pub state: &'a mut RunState,
}

/// Trait for tool execution.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool.
    ///
    /// Expected failures (storage, bad arguments) are reported inside the
    /// result object; an `Err` fails the caller's turn.
    async fn call(
        &self,
        ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>>;
}

/// A definition paired with its handler.
#[derive(Clone)]
pub struct Tool {
    /// The definition.
    pub definition: ToolDefinition,
    /// The handler.
    pub handler: Arc<dyn ToolHandler>,
}

/// Registry of available tools, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any tool of the same name.
    pub fn register(&mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        let tool = Tool {
            definition,
            handler,
        };
        match self.index.get(&tool.definition.name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(tool.definition.name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Gets a tool definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i].definition)
    }

    /// Returns all registered tool definitions.
    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter().map(|t| &t.definition)
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations in the OpenAI shape.
    #[must_use]
    pub fn to_openai_tools(&self) -> Vec<JsonValue> {
        self.definitions().map(ToolDefinition::to_openai).collect()
    }

    /// Declarations in the Anthropic shape.
    #[must_use]
    pub fn to_anthropic_tools(&self) -> Vec<JsonValue> {
        self.definitions().map(ToolDefinition::to_anthropic).collect()
    }

    /// Runs a tool by exact name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] for an unknown name, or whatever the
    /// handler fails with.
    #[instrument(skip(self, ctx, args), fields(side = %ctx.side))]
    pub async fn dispatch(
        &self,
        ctx: &mut ToolContext<'_>,
        name: &str,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let tool = self
            .index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::NotFound {
                name: name.to_string(),
            })?;
        debug!("dispatching tool");
        tool.handler.call(ctx, args).await
    }
}

/// Reads an optional string argument.
#[must_use]
pub fn arg_str<'a>(args: &'a JsonValue, name: &str) -> Option<&'a str> {
    args.get(name).and_then(JsonValue::as_str)
}

/// Reads an optional integer argument, accepting integral floats and
/// numeric strings.
#[must_use]
pub fn arg_i64(args: &JsonValue, name: &str) -> Option<i64> {
    match args.get(name)? {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A `{success: false, error}` result.
#[must_use]
pub fn failure(error: impl std::fmt::Display) -> JsonValue {
    json!({ "success": false, "error": error.to_string() })
}
