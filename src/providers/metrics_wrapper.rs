//! Metrics decorator for LLM providers.
//!
//! Wraps any provider and records duration, token usage, status and the
//! ambient agent type on every `chat` call.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::{PicoError, Result};
use crate::metrics::{recorder, LlmUsageInfo, RequestContext};
use crate::session::Message;

use super::{ChatOptions, LLMProvider, LLMResponse, ToolDefinition};

/// Decorator recording call metrics around an inner provider.
pub struct MetricsProvider {
    inner: Arc<dyn LLMProvider>,
}

impl MetricsProvider {
    pub fn wrap(inner: Arc<dyn LLMProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LLMProvider for MetricsProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    fn api_base(&self) -> &str {
        self.inner.api_base()
    }

    async fn chat(
        &self,
        ctx: &RequestContext,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let start = Instant::now();
        let target_model = model.unwrap_or_else(|| self.inner.default_model()).to_string();

        let result = self.inner.chat(ctx, messages, tools, model, options).await;
        let duration = start.elapsed();

        let status = if result.is_ok() { "success" } else { "error" };
        let usage = result.as_ref().ok().and_then(|r| {
            r.usage.as_ref().map(|u| LlmUsageInfo {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
        });

        recorder().record_llm_call(
            &target_model,
            self.inner.name(),
            self.inner.api_base(),
            ctx.agent_type,
            status,
            duration,
            usage,
        );

        if let Err(err) = &result {
            let error_type = match err {
                PicoError::Provider(pe) => pe.kind.as_str(),
                other => other.metric_label(),
            };
            recorder().record_llm_error(
                &target_model,
                self.inner.name(),
                error_type,
                ctx.agent_type,
            );
        }

        result
    }
}
