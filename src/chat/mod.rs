//! Multi-turn chat with tool calls.
//!
//! [`ToolLoop`] alternates between asking the model for a reply and running
//! the tools it requests, until the model answers in plain text.

#[cfg(test)]
mod tests;

use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::llm::{
    AssistantReply, ChatMessage, GenerationOptions, GenerationProvider, ToolCallRequest,
};
use crate::tools::{ToolHandle, ToolRegistry};
use crate::{RagError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ChatState {
    AwaitingModel,
    ExecutingTool {
        content: String,
        calls: Vec<ToolCallRequest>,
    },
    Done {
        answer: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub answer: String,
    /// Input messages plus every tool round-trip; the final answer is not included
    pub transcript: Vec<ChatMessage>,
    pub rounds: usize,
    pub options: GenerationOptions,
}

pub struct ToolLoop {
    generator: Arc<dyn GenerationProvider>,
    registry: Arc<ToolRegistry>,
    max_rounds: usize,
}

fn error_payload(error: &RagError) -> Value {
    let message = match error {
        RagError::ToolExecution { message, .. } => message.clone(),
        other => other.to_string(),
    };
    json!({ "error": message })
}

impl ToolLoop {
    #[inline]
    pub fn new(
        generator: Arc<dyn GenerationProvider>,
        registry: Arc<ToolRegistry>,
        max_rounds: usize,
    ) -> Self {
        Self {
            generator,
            registry,
            max_rounds,
        }
    }

    #[inline]
    pub fn from_config(
        generator: Arc<dyn GenerationProvider>,
        registry: Arc<ToolRegistry>,
        config: &Config,
    ) -> Self {
        Self::new(generator, registry, config.chat.max_tool_rounds)
    }

    #[inline]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run a conversation to its final answer
    #[inline]
    pub async fn chat(
        &self,
        mut transcript: Vec<ChatMessage>,
        options: &GenerationOptions,
    ) -> Result<ChatOutcome> {
        let (answer, rounds) = self.run(&mut transcript, options).await?;

        Ok(ChatOutcome {
            answer,
            transcript,
            rounds,
            options: options.clone(),
        })
    }

    /// Drive the state machine, appending tool round-trips to `transcript`.
    ///
    /// Returns the final answer and the number of tool rounds. A round that
    /// fails before its tools run leaves `transcript` as it was.
    #[inline]
    pub async fn run(
        &self,
        transcript: &mut Vec<ChatMessage>,
        options: &GenerationOptions,
    ) -> Result<(String, usize)> {
        let definitions = self.registry.definitions_for(&options.model);
        debug!(
            "Chat with model {} offering {} tools",
            options.model,
            definitions.len()
        );

        let mut rounds = 0;
        let mut state = ChatState::AwaitingModel;

        loop {
            state = match state {
                ChatState::AwaitingModel => {
                    match self
                        .generator
                        .converse(transcript, options, &definitions)
                        .await
                        .inspect_err(|e| {
                            error!("Chat turn with model {} failed: {}", options.model, e);
                        })?
                    {
                        AssistantReply::Text(answer) => ChatState::Done { answer },
                        AssistantReply::ToolCalls { content, calls } => {
                            if rounds >= self.max_rounds {
                                error!(
                                    "Model {} still calling tools after {} rounds",
                                    options.model, rounds
                                );
                                return Err(RagError::ToolLoopExceeded {
                                    max_rounds: self.max_rounds,
                                });
                            }
                            ChatState::ExecutingTool { content, calls }
                        }
                    }
                }
                ChatState::ExecutingTool { content, calls } => {
                    self.execute_round(transcript, content, calls)
                        .await
                        .inspect_err(|e| {
                            error!("Tool round {} failed: {}", rounds + 1, e);
                        })?;
                    rounds += 1;
                    ChatState::AwaitingModel
                }
                ChatState::Done { answer } => {
                    info!("Chat finished after {} tool rounds", rounds);
                    return Ok((answer, rounds));
                }
            };
        }
    }

    async fn execute_round(
        &self,
        transcript: &mut Vec<ChatMessage>,
        content: String,
        calls: Vec<ToolCallRequest>,
    ) -> Result<()> {
        let handles = calls
            .iter()
            .map(|call| self.registry.get(&call.tool_name))
            .collect::<Result<Vec<ToolHandle<'_>>>>()?;

        let mut results = Vec::with_capacity(calls.len());
        for (handle, call) in handles.iter().zip(&calls) {
            debug!("Calling tool {} with {:?}", handle.name(), call.arguments);
            let payload = match handle.invoke(&call.arguments).await {
                Ok(value) => value,
                Err(e) => {
                    warn!("Tool {} failed: {}", handle.name(), e);
                    error_payload(&e)
                }
            };
            results.push(ChatMessage::tool_result(handle.name(), payload.to_string()));
        }

        transcript.push(ChatMessage::assistant_tool_calls(content, calls));
        transcript.extend(results);
        Ok(())
    }
}
