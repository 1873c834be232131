//! Chat-completion client with tool calling.
//!
//! The executor only sees the [`ChatModel`] trait; [`OpenAIChatModel`] is the
//! production implementation and tests substitute scripted models.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::tools::ToolSpec;
use crate::config::LlmConfig;
use crate::embedding::send_with_retry;

/// A function call requested by the model, arguments still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<RawToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System(content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User(content.into())
    }

    /// Wire form for `/chat/completions`.
    pub fn to_openai(&self) -> Value {
        match self {
            ChatMessage::System(content) => json!({ "role": "system", "content": content }),
            ChatMessage::User(content) => json!({ "role": "user", "content": content }),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut message = json!({ "role": "assistant", "content": content });
                if !tool_calls.is_empty() {
                    message["tool_calls"] = tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": { "name": call.name, "arguments": call.arguments },
                            })
                        })
                        .collect();
                }
                message
            }
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content }),
        }
    }
}

/// One model response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<RawToolCall>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelTurn>;
}

/// OpenAI-compatible chat completions (`POST {base_url}/chat/completions`).
pub struct OpenAIChatModel {
    model: String,
    temperature: f32,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAIChatModel {
    /// # Errors
    ///
    /// Fails when `OPENAI_API_KEY` is not set.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            client,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelTurn> {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages.iter().map(ChatMessage::to_openai).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = tools.iter().map(ToolSpec::to_openai).collect();
        }

        let request = || {
            self.client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        };
        let response = send_with_retry("OpenAI", request, self.max_retries).await?;
        parse_completion(&response)
    }
}

fn parse_completion(response: &Value) -> Result<ModelTurn> {
    let message = response
        .pointer("/choices/0/message")
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message"))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .map(|call| RawToolCall {
                    id: call
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: call
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: call
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}")
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ModelTurn {
        content,
        tool_calls,
    })
}
