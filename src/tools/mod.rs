//! Tool registration and lookup.
//!
//! Tools are registered once at startup. The registry keeps them keyed by
//! name, compiles every parameter schema up front, and only offers
//! definitions to models on the configured allow-list.

pub mod clock;
pub mod weather;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::{RagError, Result};

pub use clock::DateTool;
pub use weather::WeatherTool;

/// Static description of a tool as offered to a model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub json_schema: Value,
}

/// A function the model may invoke mid-conversation
#[async_trait]
pub trait ToolFunction: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the `arguments` object
    fn json_schema(&self) -> Value;

    /// Failures should be [`RagError::ToolExecution`]; the chat loop hands them back to the model.
    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value>;

    #[inline]
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            json_schema: self.json_schema(),
        }
    }
}

struct RegisteredTool {
    tool: Arc<dyn ToolFunction>,
    definition: ToolDefinition,
    validator: jsonschema::Validator,
}

/// A resolved tool, ready to be invoked
pub struct ToolHandle<'a> {
    entry: &'a RegisteredTool,
}

impl ToolHandle<'_> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.entry.definition.name
    }

    /// Validate `arguments` against the tool schema, then run the tool.
    #[inline]
    pub async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value> {
        let instance = Value::Object(arguments.clone());
        let violations: Vec<String> = self
            .entry
            .validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();

        if !violations.is_empty() {
            return Err(RagError::ToolExecution {
                tool: self.name().to_string(),
                message: format!("invalid arguments: {}", violations.join("; ")),
            });
        }

        self.entry.tool.execute(arguments).await
    }
}

pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    tool_models: HashSet<String>,
}

impl ToolRegistry {
    /// Create an empty registry that offers tools to the given models
    #[inline]
    pub fn new<I, S>(tool_models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            tool_models: tool_models.into_iter().map(Into::into).collect(),
        }
    }

    /// Register a tool. Duplicate names and unusable schemas are configuration errors.
    #[inline]
    pub fn register(&mut self, tool: Arc<dyn ToolFunction>) -> Result<()> {
        let definition = tool.definition();

        if self.index.contains_key(&definition.name) {
            return Err(RagError::DuplicateTool {
                name: definition.name,
            });
        }

        let validator = jsonschema::validator_for(&definition.json_schema).map_err(|e| {
            RagError::Config(format!(
                "Tool '{}' has an invalid parameter schema: {}",
                definition.name, e
            ))
        })?;

        debug!("Registering tool {}", definition.name);
        self.index
            .insert(definition.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            tool,
            definition,
            validator,
        });
        Ok(())
    }

    #[inline]
    pub fn with_tool(mut self, tool: Arc<dyn ToolFunction>) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    /// Exact-name lookup
    #[inline]
    pub fn get(&self, name: &str) -> Result<ToolHandle<'_>> {
        self.index
            .get(name)
            .map(|&i| ToolHandle {
                entry: &self.tools[i],
            })
            .ok_or_else(|| RagError::UnknownTool {
                name: name.to_string(),
            })
    }

    #[inline]
    pub fn supports_tools(&self, model: &str) -> bool {
        self.tool_models.contains(model)
    }

    /// All definitions, in registration order, when `model` can call tools; otherwise none.
    #[inline]
    pub fn definitions_for(&self, model: &str) -> Vec<ToolDefinition> {
        if !self.supports_tools(model) {
            return Vec::new();
        }
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    #[inline]
    pub fn names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|t| t.definition.name.as_str())
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registry with the built-in weather and date tools
    #[inline]
    pub fn create_default(config: &Config) -> Result<Self> {
        let registry = Self::new(config.chat.tool_models.iter().cloned())
            .with_tool(Arc::new(WeatherTool::new()))?
            .with_tool(Arc::new(DateTool))?;

        info!(
            "Tool registry ready with {} tools for models {:?}",
            registry.len(),
            config.chat.tool_models
        );
        Ok(registry)
    }
}
