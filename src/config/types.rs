//! Configuration types.
//!
//! Every knob is a named field on a typed record; unknown fields are
//! rejected at load time via `deny_unknown_fields`. All records default so
//! a minimal config file stays minimal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::safety::SafetyLevel;
use crate::session::DmScope;

/// Top-level configuration record, mirrored by `<workspace>/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Workspace root directory. `~` expands to the home directory.
    pub workspace: String,
    pub agents: AgentsConfig,
    /// Ordered provider entries forming the fallback chain.
    pub model_list: Vec<ModelEntry>,
    /// Per-provider credential overrides keyed by provider id.
    pub providers: HashMap<String, ProviderCredential>,
    pub tools: ToolsConfig,
    pub memory: MemoryConfig,
    pub gateway: GatewayConfig,
    pub heartbeat: HeartbeatConfig,
    /// Channel adapter settings, owned by the external adapters.
    pub channels: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AgentDefaults {
    /// Agent identity used in session keys.
    pub agent_id: String,
    /// Default provider id from `model_list`.
    pub provider: String,
    pub model_name: String,
    pub safety_level: SafetyLevel,
    /// User birth year for the safety filter age bands.
    pub birth_year: Option<i32>,
    /// Optional schedule-based provider routing.
    pub schedule: Option<ScheduleConfig>,
    pub dm_scope: DmScope,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound on LLM/tool iterations within one turn.
    pub max_tool_iterations: u32,
    /// Wall-clock limit on an entire agent turn, seconds.
    pub turn_timeout_secs: u64,
    /// Per-tool-call timeout, seconds.
    pub tool_timeout_secs: u64,
    /// Session rotation threshold in estimated tokens.
    pub session_token_threshold: usize,
    /// Session idle TTL, seconds.
    pub session_ttl_secs: i64,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            agent_id: "main".to_string(),
            provider: "openai".to_string(),
            model_name: String::new(),
            safety_level: SafetyLevel::Off,
            birth_year: None,
            schedule: None,
            dm_scope: DmScope::PerChannelPeer,
            max_tokens: 4096,
            temperature: 0.7,
            max_tool_iterations: 8,
            turn_timeout_secs: 300,
            tool_timeout_secs: 60,
            session_token_threshold: 60_000,
            session_ttl_secs: 86_400,
        }
    }
}

/// One entry of the fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ModelEntry {
    /// Provider id, also the cooldown and metrics key.
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub api_key: String,
}

impl ModelEntry {
    /// API key with environment override: `<PROVIDER>_API_KEY` wins over the
    /// config file value.
    pub fn resolved_api_key(&self) -> String {
        let env_name = format!(
            "{}_API_KEY",
            self.provider.to_uppercase().replace('-', "_")
        );
        std::env::var(&env_name).unwrap_or_else(|_| self.api_key.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ProviderCredential {
    pub api_key: String,
    pub api_base: String,
}

// ============================================================================
// Schedule
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ScheduleConfig {
    pub rules: Vec<ScheduleRule>,
    pub default: ScheduleTarget,
    /// Timezone as minutes east of UTC (e.g. 480 for UTC+8).
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ScheduleRule {
    /// `mon..sun`, `weekday`, `weekend`. Empty matches every day.
    pub days: Vec<String>,
    pub hours: Option<HourRange>,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct HourRange {
    /// `HH:MM`, inclusive.
    pub start: String,
    /// `HH:MM`, exclusive. An end before start spans midnight.
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ScheduleTarget {
    pub provider: String,
    pub model: String,
}

// ============================================================================
// Tools / MCP
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ToolsConfig {
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// Default per-tool timeout for MCP calls, seconds.
    pub mcp_tool_timeout_secs: u64,
}

/// Configuration for one external MCP server.
///
/// Either `command` (stdio transport) or `url` (http transport) must be set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Per-server tool timeout override, seconds. 0 uses the manager default.
    pub tool_timeout_secs: u64,
    pub workspace_allow_list: Vec<String>,
    pub workspace_deny_list: Vec<String>,
    pub tool_allow_list: Vec<String>,
    pub tool_deny_list: Vec<String>,
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub qdrant: QdrantConfig,
    pub embedding: EmbeddingConfig,
    /// Include `tool` role messages in archived session text.
    pub archive_tool_messages: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: String,
    pub collection_name: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: String::new(),
            collection_name: "picoclaw".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    /// Chunk window in Unicode code points.
    pub chunk_size: usize,
    /// Ollama context window passthrough. 0 omits the option.
    pub num_ctx: usize,
    /// Ollama keep-alive passthrough. Empty omits the option.
    pub keep_alive: String,
    /// Request timeout, seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: String::new(),
            base_url: String::new(),
            chunk_size: 4096,
            num_ctx: 0,
            keep_alive: String::new(),
            timeout_secs: 30,
        }
    }
}

// ============================================================================
// Gateway / heartbeat
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub webhooks: HashMap<String, WebhookConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            webhooks: HashMap::new(),
        }
    }
}

/// Payload format of a configured webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    #[default]
    Json,
    Github,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct WebhookConfig {
    pub format: WebhookFormat,
    /// HMAC secret, required for `github` format.
    pub secret: String,
    /// Agent id the webhook routes to. Empty means "default".
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Tick interval, seconds.
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 1800,
        }
    }
}
