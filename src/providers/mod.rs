//! LLM provider layer.
//!
//! The layered call path is:
//!
//! ```text
//! AgentLoop -> ScheduleProvider -> FallbackChain -> MetricsProvider -> OpenAIProvider
//! ```
//!
//! Each layer is itself an [`LLMProvider`], so any subset can be composed.
//! The schedule layer picks the active target by weekday/hour; the fallback
//! chain walks its entries skipping cooled-down pairs; the metrics wrapper
//! records every concrete HTTP call.

pub mod classifier;
pub mod cooldown;
pub mod fallback;
pub mod metrics_wrapper;
pub mod openai;
pub mod schedule;
pub mod types;

pub use cooldown::CooldownTracker;
pub use fallback::{FallbackChain, ProviderEntry};
pub use metrics_wrapper::MetricsProvider;
pub use openai::OpenAIProvider;
pub use schedule::ScheduleProvider;
pub use types::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{PicoError, Result};

/// Build the provider stack described by the config.
///
/// Every `model_list` entry becomes one OpenAI-compatible provider wrapped
/// in metrics, ordered into a fallback chain. When the agent defaults carry
/// a schedule, the chain is further wrapped in a [`ScheduleProvider`] whose
/// rules resolve against the same providers by id.
pub fn create_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    if config.model_list.is_empty() {
        return Err(PicoError::Config(
            "model_list must contain at least one entry".into(),
        ));
    }

    let mut by_id: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
    let mut entries: Vec<ProviderEntry> = Vec::new();

    for entry in &config.model_list {
        let api_key = entry.resolved_api_key();
        let provider: Arc<dyn LLMProvider> = Arc::new(MetricsProvider::wrap(Arc::new(
            OpenAIProvider::with_api_base(&entry.provider, &entry.api_base, &api_key, &entry.model),
        )));
        by_id.insert(entry.provider.clone(), Arc::clone(&provider));
        entries.push(ProviderEntry::new(provider, &entry.model));
    }

    let chain: Arc<dyn LLMProvider> = Arc::new(FallbackChain::new(entries));

    if let Some(schedule) = &config.agents.defaults.schedule {
        // Rules may target either an individual provider id or the chain.
        by_id.insert("fallback".to_string(), Arc::clone(&chain));
        let schedule_provider = ScheduleProvider::new(schedule.clone(), by_id)?;
        return Ok(Arc::new(schedule_provider));
    }

    Ok(chain)
}
