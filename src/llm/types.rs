use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::{RagError, Result};

/// Author of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single entry of a chat transcript.
///
/// Assistant messages that requested tools keep the requests in `tool_calls`
/// so the model sees its own calls on the next turn; tool results carry the
/// name of the tool that produced them in `tool_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatMessage {
    #[inline]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            tool_calls: Vec::new(),
        }
    }

    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[inline]
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::assistant(content)
        }
    }

    #[inline]
    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// A structured request from the model to run a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    #[inline]
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// What the model answered in one conversational turn
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    Text(String),
    ToolCalls {
        content: String,
        calls: Vec<ToolCallRequest>,
    },
}

/// Result of a single-prompt generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Per-request overrides; unset fields fall back to configured defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub similarity_threshold: Option<f64>,
    pub max_results: Option<usize>,
}

/// Fully resolved sampling parameters for one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
}

impl GenerationOptions {
    /// Resolve `request` against `config`, explicit values winning.
    #[inline]
    pub fn resolve(request: &RequestOptions, config: &Config) -> Result<Self> {
        let model = match &request.model {
            Some(model) if model.trim().is_empty() => {
                return Err(RagError::InvalidOptions(
                    "model name cannot be empty".to_string(),
                ));
            }
            Some(model) => model.clone(),
            None => config.ollama.model.clone(),
        };

        let temperature = request.temperature.unwrap_or(config.rag.temperature);
        if !(0.0..=1.0).contains(&temperature) {
            return Err(RagError::InvalidOptions(format!(
                "temperature {temperature} is outside [0, 1]"
            )));
        }

        let top_p = request.top_p.unwrap_or(config.rag.top_p);
        if !(0.0..=1.0).contains(&top_p) {
            return Err(RagError::InvalidOptions(format!(
                "top_p {top_p} is outside [0, 1]"
            )));
        }

        Ok(Self {
            model,
            temperature,
            top_p,
        })
    }
}
