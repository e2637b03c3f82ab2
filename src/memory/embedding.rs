//! Embedding API client.
//!
//! Speaks the OpenAI-compatible `POST {base}/embeddings` shape, which both
//! hosted backends and local Ollama accept. Ollama gets its context-window
//! and keep-alive options passed through when configured.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::error::{PicoError, Result};

/// Anything that can turn text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// HTTP embedding client.
pub struct EmbeddingClient {
    provider: String,
    model: String,
    api_key: String,
    api_base: String,
    keep_alive: String,
    num_ctx: usize,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let api_base = if !config.base_url.is_empty() {
            config.base_url.clone()
        } else if config.provider.eq_ignore_ascii_case("ollama") {
            "http://localhost:11434/v1".to_string()
        } else {
            "https://api.openai.com/v1".to_string()
        };

        let timeout = if config.timeout_secs > 0 {
            config.timeout_secs
        } else {
            30
        };

        Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            api_base: api_base.trim_end_matches('/').to_string(),
            keep_alive: config.keep_alive.clone(),
            num_ctx: config.num_ctx,
            client: Client::builder()
                .timeout(Duration::from_secs(timeout))
                .build()
                .unwrap_or_default(),
        }
    }

    fn is_ollama(&self) -> bool {
        self.provider.eq_ignore_ascii_case("ollama")
            || self.api_base.to_lowercase().contains("localhost:11434")
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "input": text,
        });
        if self.is_ollama() {
            if self.num_ctx > 0 {
                body["options"] = json!({"num_ctx": self.num_ctx});
            }
            if !self.keep_alive.is_empty() {
                body["keep_alive"] = json!(self.keep_alive);
            }
        }
        body
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut req = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .json(&self.request_body(text));
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PicoError::Memory(format!(
                "embedding request failed: status={} body={}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| PicoError::Parse("no embedding data returned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, base_url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_base_openai() {
        let client = EmbeddingClient::new(&config("openai", ""));
        assert_eq!(client.api_base, "https://api.openai.com/v1");
    }

    #[test]
    fn test_default_base_ollama() {
        let client = EmbeddingClient::new(&config("ollama", ""));
        assert_eq!(client.api_base, "http://localhost:11434/v1");
        assert!(client.is_ollama());
    }

    #[test]
    fn test_explicit_base_wins() {
        let client = EmbeddingClient::new(&config("openai", "https://proxy.example/v1/"));
        assert_eq!(client.api_base, "https://proxy.example/v1");
    }

    #[test]
    fn test_openai_body_has_no_ollama_options() {
        let client = EmbeddingClient::new(&config("openai", ""));
        let body = client.request_body("hello");
        assert!(body.get("options").is_none());
        assert!(body.get("keep_alive").is_none());
        assert_eq!(body["input"], "hello");
    }

    #[test]
    fn test_ollama_options_passthrough() {
        let mut cfg = config("ollama", "");
        cfg.num_ctx = 8192;
        cfg.keep_alive = "5m".to_string();
        let client = EmbeddingClient::new(&cfg);
        let body = client.request_body("hello");
        assert_eq!(body["options"]["num_ctx"], 8192);
        assert_eq!(body["keep_alive"], "5m");
    }

    #[tokio::test]
    async fn test_embed_unreachable_endpoint() {
        let client = EmbeddingClient::new(&config("openai", "http://127.0.0.1:1/v1"));
        let result = client.embed("hello").await;
        assert!(result.is_err());
    }
}
