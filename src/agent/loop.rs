//! Agent loop implementation
//!
//! The core of the gateway: consume inbound messages, drive the iterative
//! LLM/tool dialogue per session, enforce safety on both directions, and
//! publish the final reply back on the originating channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::config::Config;
use crate::error::{PicoError, Result};
use crate::memory::MemoryManager;
use crate::metrics::{recorder, AgentType, RequestContext};
use crate::providers::{ChatOptions, LLMProvider};
use crate::safety::SafetyFilter;
use crate::session::{Message, RotationReason, SessionManager, ToolCall};
use crate::tools::{ToolContext, ToolRegistry};

use super::context::ContextBuilder;

/// Fallback reply when a turn exhausts its iteration budget.
const ITERATION_LIMIT_MESSAGE: &str =
    "I couldn't finish working on that: iteration limit reached. Try breaking the request into smaller steps.";

/// Generic user-facing failure wording; a trace id is appended per turn.
const GENERIC_ERROR_MESSAGE: &str = "Something went wrong processing your message.";

/// The main agent loop.
///
/// One instance serves every channel. Turns for the same session key are
/// serialized through a per-key mutex; distinct sessions proceed
/// concurrently, each on its own task.
pub struct AgentLoop {
    config: Config,
    session_manager: SessionManager,
    bus: MessageBus,
    provider: Arc<dyn LLMProvider>,
    tools: Arc<RwLock<ToolRegistry>>,
    safety: SafetyFilter,
    memory: Arc<MemoryManager>,
    context_builder: ContextBuilder,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentLoop {
    pub fn new(
        config: Config,
        session_manager: SessionManager,
        bus: MessageBus,
        provider: Arc<dyn LLMProvider>,
        safety: SafetyFilter,
        memory: Arc<MemoryManager>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            session_manager,
            bus,
            provider,
            tools: Arc::new(RwLock::new(ToolRegistry::new())),
            safety,
            memory,
            context_builder: ContextBuilder::new(),
            running: AtomicBool::new(false),
            shutdown_tx,
            session_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a tool with the loop's registry.
    pub async fn register_tool(&self, tool: Arc<dyn crate::tools::Tool>) -> Result<()> {
        let mut tools = self.tools.write().await;
        tools.register(tool)
    }

    pub async fn tool_count(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.tools.read().await.has(name)
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context_builder(&self) -> &ContextBuilder {
        &self.context_builder
    }

    fn agent_type_of(msg: &InboundMessage) -> AgentType {
        match msg.metadata.get("agent_type").map(String::as_str) {
            Some("cron") => AgentType::Cron,
            Some("heartbeat") => AgentType::Heartbeat,
            Some("subagent") => AgentType::Subagent,
            _ => AgentType::Main,
        }
    }

    fn chat_options(&self) -> ChatOptions {
        ChatOptions::new()
            .with_max_tokens(self.config.agents.defaults.max_tokens)
            .with_temperature(self.config.agents.defaults.temperature)
    }

    fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.config.agents.defaults.tool_timeout_secs.max(1))
    }

    async fn session_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Best-effort memory retrieval for prompt context.
    async fn memory_fragment(&self, query: &str) -> String {
        if !self.memory.is_enabled() {
            return String::new();
        }
        match self
            .memory
            .search(&self.config.workspace_id(), query, 3, 0)
            .await
        {
            Ok(results) if !results.is_empty() => {
                crate::tools::memory_search::format_results(&results)
            }
            Ok(_) => String::new(),
            Err(e) => {
                debug!(error = %e, "Memory retrieval for prompt context failed");
                String::new()
            }
        }
    }

    /// Process a single inbound message and return the reply text.
    ///
    /// Turn algorithm: safety-check the input, assemble the prompt, then
    /// iterate LLM calls and tool executions until the model produces plain
    /// content or the iteration budget runs out. The reply passes the
    /// response-side safety check before it is returned.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<String> {
        let session_lock = self.session_lock(&msg.session_key).await;
        let _session_guard = session_lock.lock().await;

        // Explicit reset: archive what exists and start fresh.
        if msg.content.trim() == "/reset" {
            self.rotate_session(&msg.session_key, RotationReason::Reset)
                .await;
            return Ok("Session reset. Starting fresh.".to_string());
        }

        // Input gate: blocked content never reaches the provider.
        let (blocked, _reason) = self.safety.check_content(&msg.content);
        if blocked {
            info!(session = %msg.session_key, "Inbound message blocked by safety filter");
            return Ok(self.safety.blocked_message());
        }

        let agent_type = Self::agent_type_of(msg);
        let ctx = RequestContext::new(agent_type)
            .with_workspace(&self.config.workspace_id())
            .with_channel(&msg.channel);

        let mut session = self.session_manager.get_or_create(&msg.session_key).await;
        let memory_fragment = self.memory_fragment(&msg.content).await;
        session.add_message(Message::user(&msg.content));

        let tool_ctx = ToolContext::new()
            .with_channel(&msg.channel, &msg.chat_id)
            .with_workspace(&self.config.workspace_id())
            .with_session_key(&msg.session_key)
            .with_agent_type(agent_type);

        let safety_fragment = self.safety.system_prompt();
        let options = self.chat_options();
        let model = if self.config.agents.defaults.model_name.is_empty() {
            None
        } else {
            Some(self.config.agents.defaults.model_name.as_str())
        };

        let max_iterations = self.config.agents.defaults.max_tool_iterations;
        let mut final_text: Option<String> = None;

        for iteration in 0..max_iterations {
            let tool_definitions = {
                let tools = self.tools.read().await;
                tools.definitions()
            };
            let messages = self.context_builder.build_messages(
                &session.messages,
                &safety_fragment,
                &memory_fragment,
            );

            let response = self
                .provider
                .chat(&ctx, messages, tool_definitions, model, options.clone())
                .await?;

            if !response.has_tool_calls() {
                final_text = Some(self.gate_response(&response.content));
                break;
            }

            debug!(
                iteration,
                calls = response.tool_calls.len(),
                "Executing tool calls"
            );
            session.add_message(Message::assistant_with_tools(
                &response.content,
                response
                    .tool_calls
                    .iter()
                    .map(|tc| ToolCall::new(&tc.id, &tc.name, &tc.arguments))
                    .collect(),
            ));

            // Sequential execution, appended in the order the model emitted.
            for tool_call in &response.tool_calls {
                let args: serde_json::Value = serde_json::from_str(&tool_call.arguments)
                    .unwrap_or_else(|e| {
                        warn!(tool = %tool_call.name, error = %e, "Invalid JSON in tool arguments");
                        serde_json::json!({"_parse_error": format!("invalid arguments JSON: {}", e)})
                    });

                let output = {
                    let tools = self.tools.read().await;
                    tools
                        .execute(&tool_call.name, args, &tool_ctx, self.tool_timeout())
                        .await
                };
                match output {
                    Ok(output) => {
                        session
                            .add_message(Message::tool_result(&tool_call.id, &output.for_llm));
                        if !output.silent {
                            if let Some(for_user) = output.for_user {
                                let _ = self.bus.publish_outbound(OutboundMessage::new(
                                    &msg.channel,
                                    &msg.chat_id,
                                    &for_user,
                                ));
                            }
                        }
                    }
                    Err(e) => {
                        session.add_message(Message::tool_result(
                            &tool_call.id,
                            &format!("Error: {}", e),
                        ));
                    }
                }
            }
        }

        let final_text = match final_text {
            Some(text) => text,
            None => {
                info!(
                    session = %msg.session_key,
                    max_iterations,
                    "Turn hit the iteration limit"
                );
                ITERATION_LIMIT_MESSAGE.to_string()
            }
        };

        session.add_message(Message::assistant(&final_text));
        self.session_manager.save(session.clone()).await;

        // End-of-turn rotation: token budget or TTL.
        if let Some(reason) = self.session_manager.rotation_reason(&session, false) {
            self.rotate_session(&msg.session_key, reason).await;
        }

        Ok(final_text)
    }

    /// Apply the response-side safety gate, returning the deliverable text.
    fn gate_response(&self, content: &str) -> String {
        let check = self.safety.check_response(content);
        if check.blocked {
            return check
                .blocked_message
                .unwrap_or_else(|| self.safety.blocked_message());
        }
        if check.needs_approval {
            return format!(
                "{}\n\n(Note: this topic is flagged for parent review.)",
                content
            );
        }
        content.to_string()
    }

    /// Archive and drop the session stored under `key`.
    async fn rotate_session(&self, key: &str, reason: RotationReason) {
        let Some(old) = self.session_manager.rotate(key).await else {
            return;
        };
        let workspace = self.config.workspace_id();
        recorder().record_session_rotation(&workspace, reason.as_str());
        info!(session = key, reason = reason.as_str(), "Rotating session");

        if self.memory.is_enabled() {
            let timestamp = old.updated_at.timestamp();
            if let Err(e) = self
                .memory
                .archive_session(&workspace, key, timestamp, &old.messages)
                .await
            {
                warn!(session = key, error = %e, "Session archival failed");
            }
        }
    }

    /// Process a synthetic prompt under an explicit session key. Used by
    /// webhooks and cron.
    pub async fn process_direct(
        &self,
        content: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
        agent_type: AgentType,
    ) -> Result<String> {
        let msg = InboundMessage::new(channel, "system", chat_id, content)
            .with_session_key(session_key)
            .with_metadata("agent_type", agent_type.as_str());
        self.process_message(&msg).await
    }

    /// Run a heartbeat probe: a fresh one-shot turn with no session history.
    pub async fn process_heartbeat(&self, prompt: &str) -> Result<String> {
        self.run_isolated_with_tools(
            prompt,
            None,
            AgentType::Heartbeat,
            "You are running a scheduled heartbeat check. If nothing needs attention, reply \
             with exactly HEARTBEAT_OK.",
        )
        .await
    }

    /// Run a subagent: a recursive synchronous mini-turn with fresh history
    /// and a restricted tool set.
    ///
    /// `role` selects a configured skill; its prompt becomes the system
    /// prompt and its allow-list bounds the visible tools. Without a
    /// matching skill, all tools except the recursive ones are available.
    pub async fn run_subagent(
        &self,
        prompt: &str,
        role: &str,
        parent_ctx: &RequestContext,
    ) -> Result<String> {
        let skill = self.context_builder.find_skill(role);
        let system_prompt = skill
            .map(|s| s.prompt.clone())
            .unwrap_or_else(|| format!("You are a focused subagent with the role '{}'. Complete the task and reply with the result only.", role));
        let allowed = skill.map(|s| s.allowed_tools.clone());

        recorder().subagent_spawns.inc(&[
            role,
            "sync",
            &parent_ctx.workspace,
        ]);

        self.run_isolated_with_tools(prompt, allowed, AgentType::Subagent, &system_prompt)
            .await
    }

    async fn run_isolated_with_tools(
        &self,
        prompt: &str,
        allowed_tools: Option<Vec<String>>,
        agent_type: AgentType,
        system_prompt: &str,
    ) -> Result<String> {
        let ctx = RequestContext::new(agent_type).with_workspace(&self.config.workspace_id());
        let tool_ctx = ToolContext::new()
            .with_workspace(&self.config.workspace_id())
            .with_agent_type(agent_type);

        let mut history = vec![Message::system(system_prompt), Message::user(prompt)];
        let options = self.chat_options();
        let model = if self.config.agents.defaults.model_name.is_empty() {
            None
        } else {
            Some(self.config.agents.defaults.model_name.as_str())
        };

        // Recursive spawning from inside an isolated run is not allowed.
        let recursive_tools = ["subagent", "spawn"];

        for _ in 0..self.config.agents.defaults.max_tool_iterations {
            let tool_definitions = {
                let tools = self.tools.read().await;
                match &allowed_tools {
                    Some(allowed) => tools.definitions_for(allowed),
                    None => tools.definitions(),
                }
            }
            .into_iter()
            .filter(|d| !recursive_tools.contains(&d.name.as_str()))
            .collect::<Vec<_>>();

            let response = self
                .provider
                .chat(&ctx, history.clone(), tool_definitions, model, options.clone())
                .await?;

            if !response.has_tool_calls() {
                let check = self.safety.check_response(&response.content);
                if check.blocked {
                    return Ok(check
                        .blocked_message
                        .unwrap_or_else(|| self.safety.blocked_message()));
                }
                return Ok(response.content);
            }

            history.push(Message::assistant_with_tools(
                &response.content,
                response
                    .tool_calls
                    .iter()
                    .map(|tc| ToolCall::new(&tc.id, &tc.name, &tc.arguments))
                    .collect(),
            ));
            for tool_call in &response.tool_calls {
                let args: serde_json::Value =
                    serde_json::from_str(&tool_call.arguments).unwrap_or_else(
                        |e| serde_json::json!({"_parse_error": format!("invalid arguments JSON: {}", e)}),
                    );
                let output = {
                    let tools = self.tools.read().await;
                    tools
                        .execute(&tool_call.name, args, &tool_ctx, self.tool_timeout())
                        .await
                };
                let text = match output {
                    Ok(output) => output.for_llm,
                    Err(e) => format!("Error: {}", e),
                };
                history.push(Message::tool_result(&tool_call.id, &text));
            }
        }

        Ok(ITERATION_LIMIT_MESSAGE.to_string())
    }

    /// Start consuming inbound messages until [`stop`] is called.
    ///
    /// Each message runs on its own task, bounded by the per-turn timeout;
    /// ordering within a session key is enforced by the per-key lock inside
    /// [`process_message`].
    ///
    /// [`stop`]: AgentLoop::stop
    /// [`process_message`]: AgentLoop::process_message
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PicoError::Config("agent loop already running".into()));
        }
        info!("Starting agent loop");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = *shutdown_rx.borrow_and_update();
        let mut inbound = self.bus.subscribe_inbound();
        let turn_timeout = Duration::from_secs(self.config.agents.defaults.turn_timeout_secs.max(1));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Received shutdown signal");
                        break;
                    }
                }
                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        info!("Inbound channel closed");
                        break;
                    };
                    let loop_ref = Arc::clone(&self);
                    tokio::spawn(async move {
                        loop_ref.handle_inbound(msg, turn_timeout).await;
                    });
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Agent loop stopped");
        Ok(())
    }

    async fn handle_inbound(&self, msg: InboundMessage, turn_timeout: Duration) {
        let trace_id = uuid::Uuid::new_v4();
        let span = info_span!(
            "turn",
            trace_id = %trace_id,
            session_key = %msg.session_key,
            channel = %msg.channel,
            sender = %msg.sender_id,
        );
        let agent_type = Self::agent_type_of(&msg);
        let start = std::time::Instant::now();
        let workspace = self.config.workspace_id();
        recorder().record_message(&msg.channel, "inbound");

        async {
            let result = tokio::time::timeout(turn_timeout, self.process_message(&msg)).await;
            let elapsed = start.elapsed();
            recorder().record_agent_turn(
                self.provider.default_model(),
                &msg.channel,
                &workspace,
                agent_type,
                elapsed,
                1,
            );

            let reply = match result {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    error!(error = %e, "Turn failed");
                    format!("{} (trace {})", GENERIC_ERROR_MESSAGE, trace_id)
                }
                Err(_) => {
                    warn!(?turn_timeout, "Turn exceeded wall-clock limit");
                    format!(
                        "{} The request took too long and was aborted. (trace {})",
                        GENERIC_ERROR_MESSAGE, trace_id
                    )
                }
            };

            if reply.is_empty() {
                return;
            }
            recorder().record_message(&msg.channel, "outbound");
            if let Err(e) = self
                .bus
                .publish_outbound(OutboundMessage::reply_to(&msg, &reply))
            {
                error!(error = %e, "Failed to publish outbound reply");
            }
        }
        .instrument(span)
        .await;
    }

    /// Stop the loop. In-flight turns finish on their own tasks.
    pub fn stop(&self) {
        info!("Stopping agent loop");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }
}
