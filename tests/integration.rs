//! Cross-module integration tests.
//!
//! These exercise whole paths through the public API: bus to agent loop to
//! outbound, schedule routing, MCP stdio servers (faked with a small shell
//! script), memory archival, and the webhook HTTP surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use picoclaw::agent::AgentLoop;
use picoclaw::bus::{InboundMessage, MessageBus};
use picoclaw::config::{
    Config, HourRange, McpServerConfig, MemoryConfig, ScheduleConfig, ScheduleRule,
    ScheduleTarget, WebhookConfig, WebhookFormat,
};
use picoclaw::error::Result;
use picoclaw::gateway::{GatewayServer, GatewayState};
use picoclaw::mcp::McpManager;
use picoclaw::memory::{Embedder, MemoryManager, SearchResult, VectorRecord, VectorStore};
use picoclaw::metrics::RequestContext;
use picoclaw::providers::{
    ChatOptions, LLMProvider, LLMResponse, ScheduleProvider, ToolDefinition,
};
use picoclaw::safety::{SafetyFilter, SafetyLevel};
use picoclaw::session::{Message, SessionManager};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Provider that pops scripted responses and counts calls.
struct ScriptedProvider {
    responses: Mutex<Vec<LLMResponse>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn new(mut responses: Vec<LLMResponse>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: AtomicU32::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
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
        let mut responses = self.responses.lock().await;
        Ok(responses
            .pop()
            .unwrap_or_else(|| LLMResponse::text("default")))
    }
}

struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.5, 0.5, 0.5, 0.5])
    }
}

/// In-memory vector store capturing upserts.
struct CapturingStore {
    records: std::sync::Mutex<Vec<VectorRecord>>,
}

impl CapturingStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            records: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn ids(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }
}

#[async_trait]
impl VectorStore for CapturingStore {
    async fn ensure_collection(&self, _name: &str, _dimension: usize) -> Result<()> {
        Ok(())
    }

    async fn store(&self, _collection: &str, record: VectorRecord) -> Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn search(
        &self,
        _collection: &str,
        _vector: Vec<f32>,
        limit: usize,
        _offset: usize,
        filters: HashMap<String, String>,
    ) -> Result<Vec<SearchResult>> {
        let workspace = filters.get("workspace_id").cloned().unwrap_or_default();
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.payload["workspace_id"] == workspace.as_str())
            .take(limit)
            .map(|r| SearchResult {
                id: r.id.clone(),
                score: 0.99,
                payload: r.payload.clone(),
            })
            .collect())
    }
}

/// Shell script emulating a stdio MCP server over line-delimited JSON-RPC.
fn fake_mcp_script(tools_json: &str) -> String {
    format!(
        r#"while read line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"protocolVersion":"2024-11-05","capabilities":{{}}}}}}\n' "$id";;
    *'"method":"tools/list"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"tools":{tools}}}}}\n' "$id";;
    *'"method":"tools/call"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"content":[{{"type":"text","text":"file contents"}}]}}}}\n' "$id";;
  esac
done"#,
        tools = tools_json
    )
}

fn fake_mcp_config(tools_json: &str) -> McpServerConfig {
    McpServerConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), fake_mcp_script(tools_json)],
        ..Default::default()
    }
}

const READ_WRITE_TOOLS: &str = r#"[{"name":"read_file","description":"Read a file","inputSchema":{"type":"object"}},{"name":"write_file","description":"Write a file","inputSchema":{"type":"object"}}]"#;
const READ_ONLY_TOOLS: &str =
    r#"[{"name":"read_file","description":"Read a file","inputSchema":{"type":"object"}}]"#;

// ---------------------------------------------------------------------------
// Agent loop through the bus
// ---------------------------------------------------------------------------

#[tokio::test]
async fn safety_low_blocks_before_any_provider_call() {
    let provider = ScriptedProvider::new(vec![LLMResponse::text("must not appear")]);
    let agent = AgentLoop::new(
        Config::default(),
        SessionManager::new(),
        MessageBus::new(),
        Arc::clone(&provider) as Arc<dyn LLMProvider>,
        SafetyFilter::new(SafetyLevel::Low, None),
        Arc::new(MemoryManager::disabled()),
    );

    let bus = agent.bus().clone();
    let mut outbound = bus.subscribe_outbound();
    let loop_ref = Arc::clone(&agent);
    let handle = tokio::spawn(async move { loop_ref.start().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    bus.publish_inbound(InboundMessage::new(
        "telegram",
        "kid",
        "chat1",
        "teach me about weapons",
    ))
    .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(reply.content.contains("filtered for safety"));
    assert_eq!(
        provider.call_count(),
        0,
        "blocked input must never reach the provider"
    );

    agent.stop();
    let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
}

#[tokio::test]
async fn full_turn_round_trip_preserves_channel() {
    let provider = ScriptedProvider::new(vec![LLMResponse::text("hello from the agent")]);
    let agent = AgentLoop::new(
        Config::default(),
        SessionManager::new(),
        MessageBus::new(),
        provider,
        SafetyFilter::disabled(),
        Arc::new(MemoryManager::disabled()),
    );

    let bus = agent.bus().clone();
    let mut outbound = bus.subscribe_outbound();
    let loop_ref = Arc::clone(&agent);
    let handle = tokio::spawn(async move { loop_ref.start().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    bus.publish_inbound(InboundMessage::new("discord", "user9", "guild7", "hi"))
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.channel, "discord");
    assert_eq!(reply.chat_id, "guild7");
    assert_eq!(reply.content, "hello from the agent");

    agent.stop();
    let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
}

// ---------------------------------------------------------------------------
// Schedule routing
// ---------------------------------------------------------------------------

fn schedule_provider(rules: Vec<ScheduleRule>) -> ScheduleProvider {
    let mut providers: HashMap<String, Arc<dyn LLMProvider>> = HashMap::new();
    providers.insert(
        "p1".to_string(),
        ScriptedProvider::new(vec![]) as Arc<dyn LLMProvider>,
    );
    providers.insert(
        "p2".to_string(),
        ScriptedProvider::new(vec![]) as Arc<dyn LLMProvider>,
    );
    providers.insert(
        "p3".to_string(),
        ScriptedProvider::new(vec![]) as Arc<dyn LLMProvider>,
    );
    ScheduleProvider::new(
        ScheduleConfig {
            rules,
            default: ScheduleTarget {
                provider: "p1".to_string(),
                model: "m1".to_string(),
            },
            utc_offset_minutes: 0,
        },
        providers,
    )
    .unwrap()
}

#[test]
fn schedule_routes_weekday_business_hours() {
    let provider = schedule_provider(vec![ScheduleRule {
        days: vec!["weekday".to_string()],
        hours: Some(HourRange {
            start: "09:00".to_string(),
            end: "17:00".to_string(),
        }),
        provider: "p2".to_string(),
        model: "m2".to_string(),
    }]);

    // Monday 10:00.
    let monday = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
    let rule = provider.match_rule(monday).expect("rule should match");
    assert_eq!(rule.provider, "p2");
    assert_eq!(rule.model, "m2");

    // Saturday 10:00 falls back to the default.
    let saturday = Utc.with_ymd_and_hms(2026, 1, 10, 10, 0, 0).unwrap();
    assert!(provider.match_rule(saturday).is_none());
}

#[test]
fn schedule_overnight_span_matches_early_morning() {
    let provider = schedule_provider(vec![ScheduleRule {
        days: vec![],
        hours: Some(HourRange {
            start: "22:00".to_string(),
            end: "06:00".to_string(),
        }),
        provider: "p3".to_string(),
        model: "m3".to_string(),
    }]);

    let five_am = Utc.with_ymd_and_hms(2026, 1, 5, 5, 0, 0).unwrap();
    assert_eq!(provider.match_rule(five_am).unwrap().provider, "p3");

    let eleven_pm = Utc.with_ymd_and_hms(2026, 1, 5, 23, 0, 0).unwrap();
    assert_eq!(provider.match_rule(eleven_pm).unwrap().provider, "p3");

    let noon = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
    assert!(provider.match_rule(noon).is_none());
}

// ---------------------------------------------------------------------------
// MCP over a fake stdio server
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mcp_stdio_handshake_catalog_and_call() {
    let manager = Arc::new(McpManager::new());

    let mut fs_config = fake_mcp_config(READ_WRITE_TOOLS);
    fs_config.tool_deny_list = vec!["write_file".to_string()];
    manager.add_server("fs", fs_config).await.unwrap();
    manager
        .add_server("db", fake_mcp_config(READ_ONLY_TOOLS))
        .await
        .unwrap();

    manager.connect("fs").await.unwrap();
    manager.connect("db").await.unwrap();

    // Catalog: both read_file tools survive under unique prefixed names;
    // write_file is denied.
    let names: Vec<String> = manager
        .get_all_tools()
        .await
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["db__read_file", "fs__read_file"]);

    // A call round-trips through the subprocess.
    let result = manager
        .call_tool("fs", "read_file", serde_json::json!({"path": "/tmp/x"}))
        .await
        .unwrap();
    assert_eq!(result.text(), "file contents");

    manager.stop().await;
}

#[tokio::test]
async fn mcp_workspace_filtering_end_to_end() {
    let manager = Arc::new(McpManager::new());

    let mut restricted = fake_mcp_config(READ_ONLY_TOOLS);
    restricted.workspace_allow_list = vec!["w1".to_string()];
    manager.add_server("restricted", restricted).await.unwrap();
    manager
        .add_server("open", fake_mcp_config(READ_ONLY_TOOLS))
        .await
        .unwrap();

    manager.connect("restricted").await.unwrap();
    manager.connect("open").await.unwrap();

    let w2_names: Vec<String> = manager
        .get_tools_for_workspace("w2")
        .await
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(w2_names, vec!["open__read_file"]);

    let w1_names = manager.get_tools_for_workspace("w1").await;
    assert_eq!(w1_names.len(), 2);

    manager.stop().await;
}

// ---------------------------------------------------------------------------
// Memory archival
// ---------------------------------------------------------------------------

fn memory_with(store: Arc<CapturingStore>) -> MemoryManager {
    MemoryManager::new(
        MemoryConfig {
            enabled: true,
            ..Default::default()
        },
        Some(store as Arc<dyn VectorStore>),
        Some(Arc::new(FixedEmbedder)),
    )
}

#[tokio::test]
async fn archive_9000_chars_makes_three_deterministic_chunks() {
    let text = "z".repeat(9000);
    let messages = vec![Message::user(&text)];

    let store_a = CapturingStore::new();
    let chunks = memory_with(Arc::clone(&store_a))
        .archive_session("w1", "session-s", 1_700_000_000, &messages)
        .await
        .unwrap();
    assert_eq!(chunks, 3);

    let store_b = CapturingStore::new();
    memory_with(Arc::clone(&store_b))
        .archive_session("w1", "session-s", 1_700_000_000, &messages)
        .await
        .unwrap();

    assert_eq!(store_a.ids(), store_b.ids(), "point ids must be deterministic");
}

#[tokio::test]
async fn archive_then_search_returns_archived_session() {
    let store = CapturingStore::new();
    let memory = memory_with(Arc::clone(&store));

    memory
        .archive_session(
            "w1",
            "picnic-session",
            1_700_000_000,
            &[Message::user("let's plan a picnic by the lake")],
        )
        .await
        .unwrap();

    let hits = memory.search("w1", "picnic", 1, 0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload["session_id"], "picnic-session");

    // Workspace isolation: another workspace sees nothing.
    let other = memory.search("w2", "picnic", 1, 0).await.unwrap();
    assert!(other.is_empty());
}

// ---------------------------------------------------------------------------
// Webhook HTTP surface
// ---------------------------------------------------------------------------

async fn start_gateway(config: Config) -> (Arc<GatewayState>, Arc<GatewayServer>, u16) {
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let mut config = config;
    config.gateway.host = "127.0.0.1".to_string();
    config.gateway.port = port;

    let state = GatewayState::new(
        config,
        MessageBus::new(),
        SessionManager::new(),
        Arc::new(McpManager::new()),
    );
    let server = Arc::new(GatewayServer::new(Arc::clone(&state)));
    let server_ref = Arc::clone(&server);
    tokio::spawn(async move { server_ref.serve().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (state, server, port)
}

async fn http_post(port: u16, path: &str, headers: &[(&str, &str)], body: &[u8]) -> String {
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let mut request = format!("POST {} HTTP/1.1\r\nHost: localhost\r\n", path);
    for (name, value) in headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    request.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn sign(secret: &str, body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    let hex: String = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("sha256={}", hex)
}

#[tokio::test]
async fn webhook_accepts_exactly_the_hmac_of_the_posted_body() {
    let mut config = Config::default();
    config.gateway.webhooks.insert(
        "gh".to_string(),
        WebhookConfig {
            format: WebhookFormat::Github,
            secret: "family-secret".to_string(),
            agent: "main".to_string(),
        },
    );

    let (state, server, port) = start_gateway(config).await;
    let mut inbound = state.bus.subscribe_inbound();

    let body = br#"{"ref":"refs/heads/main","commits":[]}"#;
    let signature = sign("family-secret", body);

    // Correct signature: accepted, forwarded to the agent loop via the bus.
    let response = http_post(
        port,
        "/webhook/gh",
        &[
            ("X-Hub-Signature-256", signature.as_str()),
            ("X-GitHub-Event", "push"),
        ],
        body,
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"));

    let msg = tokio::time::timeout(Duration::from_secs(1), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.channel, "webhook");
    assert!(msg.content.contains("GitHub Webhook Event: push"));
    assert_eq!(msg.session_key, "main:webhook:direct:gh");

    // Tampered body: rejected with 401.
    let response = http_post(
        port,
        "/webhook/gh",
        &[("X-Hub-Signature-256", signature.as_str())],
        br#"{"ref":"refs/heads/evil"}"#,
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 401"));

    server.stop();
}

#[tokio::test]
async fn health_and_metrics_endpoints_respond() {
    let (_state, server, port) = start_gateway(Config::default()).await;

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("picoclaw_uptime_seconds"));

    server.stop();
}
