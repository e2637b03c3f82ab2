//! Fallback chain over an ordered list of provider entries.
//!
//! Each entry is a `(provider, model)` pair. A request walks the chain in
//! order: entries in cooldown are skipped, retriable failures cool the entry
//! down and move on, and non-retriable failures (`Auth`, `Fatal`) abort
//! immediately. When every entry has failed the chain records an exhaustion
//! and returns the last error.
//!
//! # Example
//!
//! ```rust,ignore
//! use picoclaw::providers::{FallbackChain, ProviderEntry};
//!
//! let chain = FallbackChain::new(vec![
//!     ProviderEntry::new(primary, "gpt-x"),
//!     ProviderEntry::new(backup, "llama3"),
//! ]);
//! // If the primary is rate limited, the request lands on the backup.
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{PicoError, Result};
use crate::metrics::{recorder, RequestContext};
use crate::session::Message;

use super::cooldown::CooldownTracker;
use super::{ChatOptions, LLMProvider, LLMResponse, ToolDefinition};

/// One entry in the fallback chain: a provider and the model to request.
#[derive(Clone)]
pub struct ProviderEntry {
    pub provider: Arc<dyn LLMProvider>,
    pub model: String,
}

impl ProviderEntry {
    pub fn new(provider: Arc<dyn LLMProvider>, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
        }
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

/// An ordered provider chain with per-entry cooldown tracking.
pub struct FallbackChain {
    entries: Vec<ProviderEntry>,
    cooldown: CooldownTracker,
    /// Composite name in the form `"p1/m1 -> p2/m2"`.
    composite_name: String,
}

impl FallbackChain {
    /// Create a chain from an ordered, non-empty entry list.
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        let composite_name = entries
            .iter()
            .map(|e| format!("{}/{}", e.provider.name(), e.model))
            .collect::<Vec<_>>()
            .join(" -> ");
        Self {
            entries,
            cooldown: CooldownTracker::new(),
            composite_name,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The cooldown tracker, exposed for the status endpoint.
    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }
}

impl fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackChain")
            .field("entries", &self.entries)
            .finish()
    }
}

#[async_trait]
impl LLMProvider for FallbackChain {
    fn name(&self) -> &str {
        &self.composite_name
    }

    fn default_model(&self) -> &str {
        self.entries
            .first()
            .map(|e| e.model.as_str())
            .unwrap_or("")
    }

    async fn chat(
        &self,
        ctx: &RequestContext,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        if self.entries.is_empty() {
            return Err(PicoError::Config("fallback chain has no entries".into()));
        }

        let mut last_err: Option<PicoError> = None;

        for entry in &self.entries {
            let provider_id = entry.provider.name();
            // A model override applies to the first entry only; later entries
            // use their own configured model.
            let target_model = if last_err.is_none() {
                model.unwrap_or(&entry.model)
            } else {
                &entry.model
            };

            if self.cooldown.is_in_cooldown(provider_id, target_model) {
                recorder().record_fallback(provider_id, target_model, "cooldown", true);
                info!(
                    provider = provider_id,
                    model = target_model,
                    "Skipping provider in cooldown"
                );
                last_err.get_or_insert_with(|| {
                    PicoError::Provider(crate::error::ProviderError::new(
                        crate::error::ProviderErrorKind::Transient,
                        format!("{}/{} in cooldown", provider_id, target_model),
                    ))
                });
                continue;
            }

            match entry
                .provider
                .chat(
                    ctx,
                    messages.clone(),
                    tools.clone(),
                    Some(target_model),
                    options.clone(),
                )
                .await
            {
                Ok(response) => {
                    self.cooldown.mark_success(provider_id, target_model);
                    recorder()
                        .cooldown_active
                        .set(&[], self.cooldown.active_count() as f64);
                    return Ok(response);
                }
                Err(err) => {
                    let (should_fallback, reason) = match &err {
                        PicoError::Provider(pe) => {
                            if pe.should_fallback() {
                                self.cooldown.mark_failure(provider_id, target_model, pe.kind);
                            }
                            (pe.should_fallback(), pe.kind.as_str())
                        }
                        // Non-provider errors (IO, JSON) are treated as transient.
                        _ => {
                            self.cooldown.mark_failure(
                                provider_id,
                                target_model,
                                crate::error::ProviderErrorKind::Transient,
                            );
                            (true, "transient")
                        }
                    };
                    recorder().record_fallback(provider_id, target_model, reason, false);
                    recorder()
                        .cooldown_active
                        .set(&[], self.cooldown.active_count() as f64);

                    if !should_fallback {
                        warn!(
                            provider = provider_id,
                            model = target_model,
                            error = %err,
                            "Provider error is non-recoverable, aborting chain"
                        );
                        return Err(err);
                    }
                    warn!(
                        provider = provider_id,
                        model = target_model,
                        error = %err,
                        "Provider failed, trying next entry"
                    );
                    last_err = Some(err);
                }
            }
        }

        recorder().record_fallback_exhaustion();
        Err(last_err.unwrap_or_else(|| {
            PicoError::Provider(crate::error::ProviderError::new(
                crate::error::ProviderErrorKind::Transient,
                "all fallback entries skipped",
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, ProviderErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubProvider {
        id: &'static str,
        calls: AtomicU32,
        result: fn() -> Result<LLMResponse>,
    }

    impl StubProvider {
        fn ok(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicU32::new(0),
                result: || Ok(LLMResponse::text("ok")),
            })
        }

        fn failing(id: &'static str, kind: ProviderErrorKind) -> Arc<Self> {
            let result = match kind {
                ProviderErrorKind::Auth => {
                    || Err(ProviderError::new(ProviderErrorKind::Auth, "bad key").into())
                }
                ProviderErrorKind::Fatal => {
                    || Err(ProviderError::new(ProviderErrorKind::Fatal, "bad request").into())
                }
                ProviderErrorKind::RateLimit => {
                    || Err(ProviderError::new(ProviderErrorKind::RateLimit, "429").into())
                }
                _ => || Err(ProviderError::new(ProviderErrorKind::Transient, "503").into()),
            };
            Arc::new(Self {
                id,
                calls: AtomicU32::new(0),
                result,
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LLMProvider for StubProvider {
        fn name(&self) -> &str {
            self.id
        }

        fn default_model(&self) -> &str {
            "stub-model"
        }

        async fn chat(
            &self,
            _ctx: &RequestContext,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::default()
    }

    #[test]
    fn test_composite_name() {
        let chain = FallbackChain::new(vec![
            ProviderEntry::new(StubProvider::ok("alpha"), "m1"),
            ProviderEntry::new(StubProvider::ok("beta"), "m2"),
        ]);
        assert_eq!(chain.name(), "alpha/m1 -> beta/m2");
        assert_eq!(chain.default_model(), "m1");
    }

    #[tokio::test]
    async fn test_first_entry_success() {
        let primary = StubProvider::ok("primary");
        let backup = StubProvider::ok("backup");
        let chain = FallbackChain::new(vec![
            ProviderEntry::new(primary.clone(), "m1"),
            ProviderEntry::new(backup.clone(), "m2"),
        ]);

        let response = chain
            .chat(&ctx(), vec![], vec![], None, ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(backup.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retriable_failure_falls_through() {
        let primary = StubProvider::failing("primary", ProviderErrorKind::RateLimit);
        let backup = StubProvider::ok("backup");
        let chain = FallbackChain::new(vec![
            ProviderEntry::new(primary.clone(), "m1"),
            ProviderEntry::new(backup.clone(), "m2"),
        ]);

        let response = chain
            .chat(&ctx(), vec![], vec![], None, ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(backup.call_count(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_chain() {
        let primary = StubProvider::failing("primary", ProviderErrorKind::Auth);
        let backup = StubProvider::ok("backup");
        let chain = FallbackChain::new(vec![
            ProviderEntry::new(primary, "m1"),
            ProviderEntry::new(backup.clone(), "m2"),
        ]);

        let result = chain
            .chat(&ctx(), vec![], vec![], None, ChatOptions::new())
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Authentication"));
        assert_eq!(backup.call_count(), 0, "backup must not be tried after Auth");
    }

    #[tokio::test]
    async fn test_all_fail_returns_last_error() {
        let a = StubProvider::failing("a", ProviderErrorKind::RateLimit);
        let b = StubProvider::failing("b", ProviderErrorKind::Transient);
        let chain = FallbackChain::new(vec![
            ProviderEntry::new(a, "m1"),
            ProviderEntry::new(b, "m2"),
        ]);

        let result = chain
            .chat(&ctx(), vec![], vec![], None, ChatOptions::new())
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Transient"));
    }

    #[tokio::test]
    async fn test_cooled_entry_skipped() {
        let primary = StubProvider::failing("primary", ProviderErrorKind::RateLimit);
        let backup = StubProvider::ok("backup");
        let chain = FallbackChain::new(vec![
            ProviderEntry::new(primary.clone(), "m1"),
            ProviderEntry::new(backup.clone(), "m2"),
        ]);

        // First request: primary fails, enters cooldown, backup serves.
        let _ = chain
            .chat(&ctx(), vec![], vec![], None, ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(primary.call_count(), 1);

        // Second request: primary is in cooldown and must not be dispatched.
        let response = chain
            .chat(&ctx(), vec![], vec![], None, ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(
            primary.call_count(),
            1,
            "cooled-down provider must be skipped, not retried"
        );
        assert_eq!(backup.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_chain_is_config_error() {
        let chain = FallbackChain::new(vec![]);
        let result = chain
            .chat(&ctx(), vec![], vec![], None, ChatOptions::new())
            .await;
        assert!(matches!(result, Err(PicoError::Config(_))));
    }
}
