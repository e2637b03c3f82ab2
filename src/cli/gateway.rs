//! `picoclaw gateway` — assemble and run the full gateway.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::agent::AgentLoop;
use crate::bus::MessageBus;
use crate::config::Config;
use crate::cron::{CronJob, CronService, JobHandler};
use crate::gateway::{GatewayServer, GatewayState};
use crate::heartbeat::{HeartbeatHandler, HeartbeatService};
use crate::mcp::McpManager;
use crate::memory::{EmbeddingClient, MemoryManager, QdrantClient};
use crate::metrics::AgentType;
use crate::providers;
use crate::safety::SafetyFilter;
use crate::session::{build_session_key, DmScope, Peer, SessionKeyParams, SessionManager};
use crate::tools::{
    adapters_for_workspace, CronTool, MemoryBrowseTool, MemorySearchTool, SpawnTool, SubagentTool,
};

/// Run the gateway until interrupted.
pub async fn cmd_gateway(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let defaults = config.agents.defaults.clone();

    let provider = providers::create_provider(&config).context("building provider stack")?;
    info!(provider = provider.name(), "Provider stack ready");

    let memory = Arc::new(build_memory(&config));
    let safety = SafetyFilter::new(defaults.safety_level, defaults.birth_year);
    let bus = MessageBus::new();
    let session_manager = SessionManager::with_policy(
        defaults.session_token_threshold,
        defaults.session_ttl_secs,
    );

    // MCP servers.
    let mcp_timeout = if config.tools.mcp_tool_timeout_secs > 0 {
        Duration::from_secs(config.tools.mcp_tool_timeout_secs)
    } else {
        crate::mcp::DEFAULT_TOOL_TIMEOUT
    };
    let mcp = Arc::new(McpManager::with_timeout(mcp_timeout));
    for (name, server_config) in &config.tools.mcp_servers {
        if let Err(e) = mcp.add_server(name, server_config.clone()).await {
            warn!(server = name, error = %e, "Skipping invalid MCP server config");
        }
    }
    mcp.start().await;

    // Agent loop plus built-in tools.
    let agent = AgentLoop::new(
        config.clone(),
        session_manager.clone(),
        bus.clone(),
        provider,
        safety,
        Arc::clone(&memory),
    );
    let workspace_id = config.workspace_id();

    agent
        .register_tool(Arc::new(MemorySearchTool::new(Arc::clone(&memory))))
        .await?;
    agent
        .register_tool(Arc::new(MemoryBrowseTool::new(Arc::clone(&memory))))
        .await?;

    let subagent_manager = crate::subagent::SubagentManager::new(&workspace_id);
    agent
        .register_tool(Arc::new(SubagentTool::new(Arc::downgrade(&agent))))
        .await?;
    agent
        .register_tool(Arc::new(SpawnTool::new(
            Arc::downgrade(&agent),
            Arc::clone(&subagent_manager),
            bus.clone(),
        )))
        .await?;

    let cron_service = Arc::new(CronService::new(config.cron_store_path()));
    agent
        .register_tool(Arc::new(CronTool::new(Arc::clone(&cron_service))))
        .await?;

    // MCP-backed tools visible in this workspace.
    for adapter in adapters_for_workspace(&mcp, &workspace_id).await? {
        agent.register_tool(Arc::new(adapter)).await?;
    }
    info!(tools = agent.tool_count().await, "Tools registered");

    // Cron handler: run the job's prompt through the loop under a
    // designated session key and deliver the reply on the job's channel.
    let cron_agent = Arc::clone(&agent);
    let cron_handler: JobHandler = Arc::new(move |job: CronJob| {
        let agent = Arc::clone(&cron_agent);
        Box::pin(async move {
            let session_key = build_session_key(&SessionKeyParams {
                agent_id: agent.config().agents.defaults.agent_id.clone(),
                channel: "cron".to_string(),
                peer: Peer::direct(&job.id),
                dm_scope: DmScope::PerChannelPeer,
            })?;
            let reply = agent
                .process_direct(
                    &job.payload.message,
                    &session_key,
                    &job.payload.channel,
                    &job.payload.chat_id,
                    AgentType::Cron,
                )
                .await?;
            let _ = agent.bus().publish_outbound(crate::bus::OutboundMessage::new(
                &job.payload.channel,
                &job.payload.chat_id,
                &reply,
            ));
            Ok(reply)
        })
    });
    cron_service.set_handler(cron_handler).await;
    cron_service.start().await?;
    info!("Cron service started");

    // Heartbeat.
    let heartbeat = if config.heartbeat.enabled {
        let hb_agent = Arc::clone(&agent);
        let handler: HeartbeatHandler = Arc::new(move |prompt: String| {
            let agent = Arc::clone(&hb_agent);
            Box::pin(async move { agent.process_heartbeat(&prompt).await })
        });
        let service = Arc::new(HeartbeatService::new(
            config.heartbeat_file_path(),
            config.heartbeat.interval_secs,
            bus.clone(),
            handler,
            "cli",
            "direct",
            &workspace_id,
        ));
        service.start().await?;
        info!("Heartbeat service started");
        Some(service)
    } else {
        None
    };

    // HTTP surface.
    let state = GatewayState::new(config.clone(), bus.clone(), session_manager, Arc::clone(&mcp));
    let server = Arc::new(GatewayServer::new(Arc::clone(&state)));
    let server_ref = Arc::clone(&server);
    let server_handle = tokio::spawn(async move { server_ref.serve().await });

    // The loop itself.
    let loop_ref = Arc::clone(&agent);
    let loop_handle = tokio::spawn(async move { loop_ref.start().await });
    state.set_ready(true);

    println!(
        "Gateway started on {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    println!("\nShutting down...");

    state.set_ready(false);
    if let Some(heartbeat) = heartbeat {
        heartbeat.stop().await;
    }
    cron_service.stop().await;
    subagent_manager.shutdown();
    agent.stop();
    server.stop();
    mcp.stop().await;

    let _ = tokio::time::timeout(Duration::from_secs(5), loop_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;
    println!("Gateway stopped");
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load(&path).with_context(|| format!("loading config {}", path.display()))
        }
        None => {
            let default = Config::default();
            let candidate = default.workspace_path().join("config.json");
            if candidate.exists() {
                Config::load(&candidate)
                    .with_context(|| format!("loading config {}", candidate.display()))
            } else {
                warn!(
                    path = %candidate.display(),
                    "No config found, using defaults; run 'picoclaw onboard' to create one"
                );
                Ok(default)
            }
        }
    }
}

fn build_memory(config: &Config) -> MemoryManager {
    if !config.memory.enabled {
        return MemoryManager::disabled();
    }
    let store = QdrantClient::new(&config.memory.qdrant);
    let embedder = EmbeddingClient::new(&config.memory.embedding);
    MemoryManager::new(
        config.memory.clone(),
        Some(Arc::new(store)),
        Some(Arc::new(embedder)),
    )
}
