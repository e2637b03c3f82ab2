//! OpenAI-compatible chat-completions provider.
//!
//! Speaks the Chat Completions wire format, which most hosted and local
//! backends (OpenAI, OpenRouter, Groq, Ollama) accept. A provider entry in
//! the config maps onto one instance with its own api base, key and default
//! model.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::metrics::RequestContext;
use crate::session::{Message, Role};

use super::classifier;
use super::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};

/// The default OpenAI API endpoint URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Default request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunctionDef,
}

#[derive(Debug, Clone, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI-compatible LLM provider.
pub struct OpenAIProvider {
    /// Stable provider identifier used in metrics and cooldown keys.
    id: String,
    api_key: String,
    api_base: String,
    default_model: String,
    client: Client,
}

impl OpenAIProvider {
    /// Create a provider against the default OpenAI endpoint.
    pub fn new(api_key: &str, default_model: &str) -> Self {
        Self::with_api_base("openai", OPENAI_API_URL, api_key, default_model)
    }

    /// Create a provider against any OpenAI-compatible endpoint.
    ///
    /// # Arguments
    /// * `id` - stable identifier (config key) for this provider entry
    /// * `api_base` - base URL, trailing slash optional
    /// * `api_key` - bearer token, may be empty for local backends
    /// * `default_model` - model used when the caller passes none
    pub fn with_api_base(id: &str, api_base: &str, api_key: &str, default_model: &str) -> Self {
        Self {
            id: id.to_string(),
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            default_model: default_model.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }

    fn convert_messages(messages: Vec<Message>) -> Vec<WireMessage> {
        messages
            .into_iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                let tool_calls = m.tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .map(|c| WireToolCall {
                            id: c.id,
                            r#type: "function".to_string(),
                            function: WireFunctionCall {
                                name: c.name,
                                arguments: c.arguments,
                            },
                        })
                        .collect()
                });
                WireMessage {
                    role: role.to_string(),
                    content: if m.content.is_empty() && tool_calls.is_some() {
                        None
                    } else {
                        Some(m.content)
                    },
                    tool_calls,
                    tool_call_id: m.tool_call_id,
                }
            })
            .collect()
    }

    fn convert_tools(tools: Vec<ToolDefinition>) -> Option<Vec<WireTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .into_iter()
                .map(|t| WireTool {
                    r#type: "function".to_string(),
                    function: WireFunctionDef {
                        name: t.name,
                        description: t.description,
                        parameters: t.parameters,
                    },
                })
                .collect(),
        )
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn chat(
        &self,
        ctx: &RequestContext,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let model = model.unwrap_or(&self.default_model).to_string();
        let request = ChatRequest {
            model: model.clone(),
            messages: Self::convert_messages(messages),
            tools: Self::convert_tools(tools),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop,
        };

        debug!(
            provider = %self.id,
            model = %model,
            trace_id = %ctx.trace_id,
            "Sending chat completion request"
        );

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .json(&request);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| classifier::classify(None, &e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classifier::classify(Some(status.as_u16()), &body).into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| classifier::classify(None, &e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| classifier::classify(None, "response contained no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| LLMToolCall::new(&c.id, &c.function.name, &c.function.arguments))
            .collect();

        let mut result = LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: None,
        };
        if let Some(usage) = parsed.usage {
            result = result.with_usage(Usage::new(usage.prompt_tokens, usage.completion_tokens));
        }
        Ok(result)
    }
}
