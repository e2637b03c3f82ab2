//! Metrics recorder.
//!
//! Single-process registry of typed counters, gauges and histograms covering
//! every subsystem, rendered in Prometheus text exposition format for the
//! `/metrics` endpoint. Thread-safe via interior `Mutex`; all recording
//! methods take `&self`.
//!
//! The cross-cutting agent type (`main`, `subagent`, `heartbeat`, `cron`)
//! travels in [`RequestContext`], which is threaded explicitly through every
//! I/O call instead of living in process globals. The only process-wide
//! mutable state is the recorder itself (write-only from the rest of the
//! system) and its uptime clock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

// ============================================================================
// Ambient request context
// ============================================================================

/// The source of an LLM request or tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentType {
    #[default]
    Main,
    Subagent,
    Heartbeat,
    Cron,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Main => "main",
            AgentType::Subagent => "subagent",
            AgentType::Heartbeat => "heartbeat",
            AgentType::Cron => "cron",
        }
    }
}

/// Cross-cutting request context threaded through provider and tool calls.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub agent_type: AgentType,
    /// Trace id surfaced in logs and generic error replies.
    pub trace_id: String,
    pub workspace: String,
    pub channel: String,
}

impl RequestContext {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            trace_id: uuid::Uuid::new_v4().to_string(),
            workspace: String::new(),
            channel: String::new(),
        }
    }

    pub fn with_workspace(mut self, workspace: &str) -> Self {
        self.workspace = workspace.to_string();
        self
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    /// A child context for a spawned subagent: same workspace/channel, new
    /// trace id, subagent agent type.
    pub fn subagent_child(&self) -> Self {
        Self {
            agent_type: AgentType::Subagent,
            trace_id: uuid::Uuid::new_v4().to_string(),
            workspace: self.workspace.clone(),
            channel: self.channel.clone(),
        }
    }
}

// ============================================================================
// Metric families
// ============================================================================

type LabelValues = Vec<String>;

/// A labeled counter family.
pub struct CounterVec {
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    values: Mutex<HashMap<LabelValues, u64>>,
}

impl CounterVec {
    fn new(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            labels,
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, label_values: &[&str], delta: u64) {
        debug_assert_eq!(label_values.len(), self.labels.len());
        let key: LabelValues = label_values.iter().map(|s| s.to_string()).collect();
        *self.values.lock().unwrap().entry(key).or_insert(0) += delta;
    }

    pub fn inc(&self, label_values: &[&str]) {
        self.add(label_values, 1);
    }

    pub fn get(&self, label_values: &[&str]) -> u64 {
        let key: LabelValues = label_values.iter().map(|s| s.to_string()).collect();
        self.values.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!("# HELP {} {}\n", self.name, self.help));
        out.push_str(&format!("# TYPE {} counter\n", self.name));
        let values = self.values.lock().unwrap();
        if values.is_empty() {
            return;
        }
        let mut entries: Vec<_> = values.iter().collect();
        entries.sort();
        for (labels, value) in entries {
            out.push_str(&format!(
                "{}{} {}\n",
                self.name,
                render_labels(self.labels, labels),
                value
            ));
        }
    }
}

/// A labeled gauge family.
pub struct GaugeVec {
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    values: Mutex<HashMap<LabelValues, f64>>,
}

impl GaugeVec {
    fn new(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            labels,
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, label_values: &[&str], value: f64) {
        debug_assert_eq!(label_values.len(), self.labels.len());
        let key: LabelValues = label_values.iter().map(|s| s.to_string()).collect();
        self.values.lock().unwrap().insert(key, value);
    }

    pub fn get(&self, label_values: &[&str]) -> f64 {
        let key: LabelValues = label_values.iter().map(|s| s.to_string()).collect();
        self.values.lock().unwrap().get(&key).copied().unwrap_or(0.0)
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!("# HELP {} {}\n", self.name, self.help));
        out.push_str(&format!("# TYPE {} gauge\n", self.name));
        let values = self.values.lock().unwrap();
        let mut entries: Vec<_> = values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (labels, value) in entries {
            out.push_str(&format!(
                "{}{} {}\n",
                self.name,
                render_labels(self.labels, labels),
                value
            ));
        }
    }
}

#[derive(Debug, Clone, Default)]
struct HistogramData {
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// A labeled histogram family with fixed buckets.
pub struct HistogramVec {
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    buckets: &'static [f64],
    values: Mutex<HashMap<LabelValues, HistogramData>>,
}

impl HistogramVec {
    fn new(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
        buckets: &'static [f64],
    ) -> Self {
        Self {
            name,
            help,
            labels,
            buckets,
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe(&self, label_values: &[&str], value: f64) {
        debug_assert_eq!(label_values.len(), self.labels.len());
        let key: LabelValues = label_values.iter().map(|s| s.to_string()).collect();
        let mut values = self.values.lock().unwrap();
        let data = values.entry(key).or_insert_with(|| HistogramData {
            bucket_counts: vec![0; self.buckets.len()],
            sum: 0.0,
            count: 0,
        });
        for (i, bound) in self.buckets.iter().enumerate() {
            if value <= *bound {
                data.bucket_counts[i] += 1;
            }
        }
        data.sum += value;
        data.count += 1;
    }

    pub fn count(&self, label_values: &[&str]) -> u64 {
        let key: LabelValues = label_values.iter().map(|s| s.to_string()).collect();
        self.values
            .lock()
            .unwrap()
            .get(&key)
            .map(|d| d.count)
            .unwrap_or(0)
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!("# HELP {} {}\n", self.name, self.help));
        out.push_str(&format!("# TYPE {} histogram\n", self.name));
        let values = self.values.lock().unwrap();
        let mut entries: Vec<_> = values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (labels, data) in entries {
            for (i, bound) in self.buckets.iter().enumerate() {
                out.push_str(&format!(
                    "{}_bucket{} {}\n",
                    self.name,
                    render_labels_with(self.labels, labels, "le", &format!("{}", bound)),
                    data.bucket_counts[i]
                ));
            }
            out.push_str(&format!(
                "{}_bucket{} {}\n",
                self.name,
                render_labels_with(self.labels, labels, "le", "+Inf"),
                data.count
            ));
            out.push_str(&format!(
                "{}_sum{} {}\n",
                self.name,
                render_labels(self.labels, labels),
                data.sum
            ));
            out.push_str(&format!(
                "{}_count{} {}\n",
                self.name,
                render_labels(self.labels, labels),
                data.count
            ));
        }
    }
}

fn render_labels(names: &[&str], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = names
        .iter()
        .zip(values.iter())
        .map(|(n, v)| format!("{}=\"{}\"", n, v.replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

fn render_labels_with(names: &[&str], values: &[String], extra_name: &str, extra_value: &str) -> String {
    let mut pairs: Vec<String> = names
        .iter()
        .zip(values.iter())
        .map(|(n, v)| format!("{}=\"{}\"", n, v.replace('"', "\\\"")))
        .collect();
    pairs.push(format!("{}=\"{}\"", extra_name, extra_value));
    format!("{{{}}}", pairs.join(","))
}

// ============================================================================
// Recorder
// ============================================================================

/// Token usage attached to an LLM call record.
#[derive(Debug, Clone, Copy)]
pub struct LlmUsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// High-level recording surface over all metric families.
pub struct Recorder {
    start_time: Instant,

    pub llm_requests: CounterVec,
    pub llm_request_duration: HistogramVec,
    pub llm_tokens_prompt: CounterVec,
    pub llm_tokens_completion: CounterVec,
    pub llm_errors: CounterVec,

    pub tool_calls: CounterVec,
    pub tool_duration: HistogramVec,
    pub tool_errors: CounterVec,

    pub agent_turns: CounterVec,
    pub agent_response_duration: HistogramVec,
    pub agent_iterations: HistogramVec,

    pub subagent_spawns: CounterVec,
    pub subagent_active: GaugeVec,

    pub heartbeat_total: CounterVec,
    pub cron_executions: CounterVec,
    pub cron_jobs_active: GaugeVec,

    pub messages_total: CounterVec,
    pub bus_drops: CounterVec,

    pub fallback_attempts: CounterVec,
    pub fallback_exhausted: CounterVec,
    pub cooldown_active: GaugeVec,

    pub session_active: GaugeVec,
    pub session_rotations: CounterVec,

    pub mcp_parse_errors: CounterVec,
    pub mcp_tool_calls: CounterVec,

    pub memory_archive_duration: HistogramVec,
    pub memory_search_duration: HistogramVec,

    pub uptime: GaugeVec,
}

const DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0];
const TOOL_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];
const TURN_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0];
const ITERATION_BUCKETS: &[f64] = &[1.0, 2.0, 3.0, 5.0, 10.0, 20.0];

impl Recorder {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),

            llm_requests: CounterVec::new(
                "picoclaw_llm_requests_total",
                "Total LLM requests attempted.",
                &["model", "provider", "agent_type"],
            ),
            llm_request_duration: HistogramVec::new(
                "picoclaw_llm_request_duration_seconds",
                "Duration of LLM requests.",
                &["model", "provider", "api_base", "agent_type", "status"],
                DURATION_BUCKETS,
            ),
            llm_tokens_prompt: CounterVec::new(
                "picoclaw_llm_tokens_prompt_total",
                "Total prompt tokens consumed.",
                &["model", "provider", "api_base", "agent_type"],
            ),
            llm_tokens_completion: CounterVec::new(
                "picoclaw_llm_tokens_completion_total",
                "Total completion tokens generated.",
                &["model", "provider", "api_base", "agent_type"],
            ),
            llm_errors: CounterVec::new(
                "picoclaw_llm_errors_total",
                "Total LLM call errors.",
                &["model", "provider", "error_type", "agent_type"],
            ),

            tool_calls: CounterVec::new(
                "picoclaw_tool_calls_total",
                "Total tool executions.",
                &["tool_name", "agent_type", "status"],
            ),
            tool_duration: HistogramVec::new(
                "picoclaw_tool_duration_seconds",
                "Duration of tool executions.",
                &["tool_name", "agent_type"],
                TOOL_BUCKETS,
            ),
            tool_errors: CounterVec::new(
                "picoclaw_tool_errors_total",
                "Total tool execution errors.",
                &["tool_name", "error_type"],
            ),

            agent_turns: CounterVec::new(
                "picoclaw_agent_turns_total",
                "Total agent response cycles.",
                &["model", "channel", "workspace", "agent_type"],
            ),
            agent_response_duration: HistogramVec::new(
                "picoclaw_agent_response_duration_seconds",
                "End-to-end duration for agent to respond to user message.",
                &["model", "channel", "workspace", "agent_type"],
                TURN_BUCKETS,
            ),
            agent_iterations: HistogramVec::new(
                "picoclaw_agent_iterations_per_turn",
                "Number of LLM + tool iterations in a single turn.",
                &["model", "agent_type"],
                ITERATION_BUCKETS,
            ),

            subagent_spawns: CounterVec::new(
                "picoclaw_subagent_spawns_total",
                "Total subagents spawned.",
                &["role", "type", "workspace"],
            ),
            subagent_active: GaugeVec::new(
                "picoclaw_subagent_active",
                "Number of currently active subagent tasks.",
                &["workspace"],
            ),

            heartbeat_total: CounterVec::new(
                "picoclaw_heartbeat_total",
                "Total heartbeat events.",
                &["status", "workspace"],
            ),
            cron_executions: CounterVec::new(
                "picoclaw_cron_executions_total",
                "Total cron job executions.",
                &["job_name", "status"],
            ),
            cron_jobs_active: GaugeVec::new(
                "picoclaw_cron_jobs_active_total",
                "Currently enabled cron jobs.",
                &[],
            ),

            messages_total: CounterVec::new(
                "picoclaw_messages_total",
                "Total messages flowing through the bus.",
                &["channel", "direction"],
            ),
            bus_drops: CounterVec::new(
                "picoclaw_bus_drops_total",
                "Total messages dropped by the bus.",
                &["direction"],
            ),

            fallback_attempts: CounterVec::new(
                "picoclaw_fallback_attempts_total",
                "Total model fallback attempts.",
                &["provider", "model", "reason", "skipped"],
            ),
            fallback_exhausted: CounterVec::new(
                "picoclaw_fallback_exhausted_total",
                "Total fallback chain exhaustions (all models failed).",
                &[],
            ),
            cooldown_active: GaugeVec::new(
                "picoclaw_cooldown_active",
                "Number of provider/model pairs currently in cooldown.",
                &[],
            ),

            session_active: GaugeVec::new(
                "picoclaw_session_active",
                "Number of active sessions.",
                &["workspace"],
            ),
            session_rotations: CounterVec::new(
                "picoclaw_session_rotations_total",
                "Total session rotation events.",
                &["workspace", "reason"],
            ),

            mcp_parse_errors: CounterVec::new(
                "picoclaw_mcp_parse_errors_total",
                "Malformed JSON-RPC lines dropped per MCP server.",
                &["server"],
            ),
            mcp_tool_calls: CounterVec::new(
                "picoclaw_mcp_tool_calls_total",
                "Total MCP tool invocations.",
                &["server", "status"],
            ),

            memory_archive_duration: HistogramVec::new(
                "picoclaw_memory_archive_duration_seconds",
                "Duration of session archiving to the vector store.",
                &["workspace"],
                TOOL_BUCKETS,
            ),
            memory_search_duration: HistogramVec::new(
                "picoclaw_memory_search_duration_seconds",
                "Duration of vector memory searches.",
                &[],
                TOOL_BUCKETS,
            ),

            uptime: GaugeVec::new(
                "picoclaw_uptime_seconds",
                "Application uptime in seconds.",
                &[],
            ),
        }
    }

    /// Record duration, tokens and status for one LLM call.
    pub fn record_llm_call(
        &self,
        model: &str,
        provider: &str,
        api_base: &str,
        agent_type: AgentType,
        status: &str,
        duration: Duration,
        usage: Option<LlmUsageInfo>,
    ) {
        let at = agent_type.as_str();
        self.llm_requests.inc(&[model, provider, at]);
        self.llm_request_duration
            .observe(&[model, provider, api_base, at, status], duration.as_secs_f64());
        if let Some(usage) = usage {
            self.llm_tokens_prompt
                .add(&[model, provider, api_base, at], usage.prompt_tokens as u64);
            self.llm_tokens_completion
                .add(&[model, provider, api_base, at], usage.completion_tokens as u64);
        }
    }

    pub fn record_llm_error(
        &self,
        model: &str,
        provider: &str,
        error_type: &str,
        agent_type: AgentType,
    ) {
        self.llm_errors
            .inc(&[model, provider, error_type, agent_type.as_str()]);
    }

    pub fn record_tool_call(
        &self,
        name: &str,
        agent_type: AgentType,
        status: &str,
        duration: Duration,
    ) {
        let at = agent_type.as_str();
        self.tool_calls.inc(&[name, at, status]);
        self.tool_duration.observe(&[name, at], duration.as_secs_f64());
    }

    pub fn record_tool_error(&self, name: &str, error_type: &str) {
        self.tool_errors.inc(&[name, error_type]);
    }

    pub fn record_agent_turn(
        &self,
        model: &str,
        channel: &str,
        workspace: &str,
        agent_type: AgentType,
        duration: Duration,
        iterations: u32,
    ) {
        let at = agent_type.as_str();
        self.agent_turns.inc(&[model, channel, workspace, at]);
        self.agent_response_duration
            .observe(&[model, channel, workspace, at], duration.as_secs_f64());
        self.agent_iterations
            .observe(&[model, at], iterations as f64);
    }

    pub fn record_fallback(&self, provider: &str, model: &str, reason: &str, skipped: bool) {
        let skipped_str = if skipped { "true" } else { "false" };
        self.fallback_attempts
            .inc(&[provider, model, reason, skipped_str]);
    }

    pub fn record_fallback_exhaustion(&self) {
        self.fallback_exhausted.inc(&[]);
    }

    pub fn record_heartbeat(&self, status: &str, workspace: &str) {
        self.heartbeat_total.inc(&[status, workspace]);
    }

    pub fn record_cron_execution(&self, job_name: &str, status: &str) {
        self.cron_executions.inc(&[job_name, status]);
    }

    pub fn record_message(&self, channel: &str, direction: &str) {
        self.messages_total.inc(&[channel, direction]);
    }

    pub fn record_bus_drops(&self, direction: &str, count: u64) {
        self.bus_drops.add(&[direction], count);
    }

    pub fn record_session_rotation(&self, workspace: &str, reason: &str) {
        self.session_rotations.inc(&[workspace, reason]);
    }

    /// Refresh the uptime gauge. Called from the gateway scrape path.
    pub fn update_uptime(&self) {
        self.uptime.set(&[], self.start_time.elapsed().as_secs_f64());
    }

    /// Render all families in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.update_uptime();
        let mut out = String::new();
        self.llm_requests.render(&mut out);
        self.llm_request_duration.render(&mut out);
        self.llm_tokens_prompt.render(&mut out);
        self.llm_tokens_completion.render(&mut out);
        self.llm_errors.render(&mut out);
        self.tool_calls.render(&mut out);
        self.tool_duration.render(&mut out);
        self.tool_errors.render(&mut out);
        self.agent_turns.render(&mut out);
        self.agent_response_duration.render(&mut out);
        self.agent_iterations.render(&mut out);
        self.subagent_spawns.render(&mut out);
        self.subagent_active.render(&mut out);
        self.heartbeat_total.render(&mut out);
        self.cron_executions.render(&mut out);
        self.cron_jobs_active.render(&mut out);
        self.messages_total.render(&mut out);
        self.bus_drops.render(&mut out);
        self.fallback_attempts.render(&mut out);
        self.fallback_exhausted.render(&mut out);
        self.cooldown_active.render(&mut out);
        self.session_active.render(&mut out);
        self.session_rotations.render(&mut out);
        self.mcp_parse_errors.render(&mut out);
        self.mcp_tool_calls.render(&mut out);
        self.memory_archive_duration.render(&mut out);
        self.memory_search_duration.render(&mut out);
        self.uptime.render(&mut out);
        out
    }
}

static RECORDER: Lazy<Recorder> = Lazy::new(Recorder::new);

/// The process-wide recorder instance.
pub fn recorder() -> &'static Recorder {
    &RECORDER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_inc_and_get() {
        let c = CounterVec::new("test_total", "help", &["a"]);
        assert_eq!(c.get(&["x"]), 0);
        c.inc(&["x"]);
        c.inc(&["x"]);
        c.add(&["y"], 5);
        assert_eq!(c.get(&["x"]), 2);
        assert_eq!(c.get(&["y"]), 5);
    }

    #[test]
    fn test_counter_render() {
        let c = CounterVec::new("test_total", "A test counter.", &["kind"]);
        c.inc(&["alpha"]);
        let mut out = String::new();
        c.render(&mut out);
        assert!(out.contains("# TYPE test_total counter"));
        assert!(out.contains("test_total{kind=\"alpha\"} 1"));
    }

    #[test]
    fn test_gauge_set_and_render() {
        let g = GaugeVec::new("test_gauge", "A test gauge.", &[]);
        g.set(&[], 3.5);
        assert_eq!(g.get(&[]), 3.5);
        let mut out = String::new();
        g.render(&mut out);
        assert!(out.contains("test_gauge 3.5"));
    }

    #[test]
    fn test_histogram_observe() {
        let h = HistogramVec::new("test_seconds", "help", &["op"], &[1.0, 5.0]);
        h.observe(&["read"], 0.5);
        h.observe(&["read"], 3.0);
        h.observe(&["read"], 10.0);
        assert_eq!(h.count(&["read"]), 3);

        let mut out = String::new();
        h.render(&mut out);
        assert!(out.contains("test_seconds_bucket{op=\"read\",le=\"1\"} 1"));
        assert!(out.contains("test_seconds_bucket{op=\"read\",le=\"5\"} 2"));
        assert!(out.contains("test_seconds_bucket{op=\"read\",le=\"+Inf\"} 3"));
        assert!(out.contains("test_seconds_count{op=\"read\"} 3"));
    }

    #[test]
    fn test_recorder_llm_call() {
        let r = Recorder::new();
        r.record_llm_call(
            "gpt-x",
            "openai",
            "https://api.openai.com/v1",
            AgentType::Main,
            "success",
            Duration::from_millis(500),
            Some(LlmUsageInfo {
                prompt_tokens: 100,
                completion_tokens: 50,
            }),
        );
        assert_eq!(r.llm_requests.get(&["gpt-x", "openai", "main"]), 1);
        assert_eq!(
            r.llm_tokens_prompt
                .get(&["gpt-x", "openai", "https://api.openai.com/v1", "main"]),
            100
        );
    }

    #[test]
    fn test_recorder_fallback_metrics() {
        let r = Recorder::new();
        r.record_fallback("p1", "m1", "rate_limit", false);
        r.record_fallback("p1", "m1", "cooldown", true);
        r.record_fallback_exhaustion();
        assert_eq!(r.fallback_attempts.get(&["p1", "m1", "rate_limit", "false"]), 1);
        assert_eq!(r.fallback_attempts.get(&["p1", "m1", "cooldown", "true"]), 1);
        assert_eq!(r.fallback_exhausted.get(&[]), 1);
    }

    #[test]
    fn test_render_contains_uptime() {
        let r = Recorder::new();
        let text = r.render();
        assert!(text.contains("picoclaw_uptime_seconds"));
        assert!(text.contains("# TYPE picoclaw_bus_drops_total counter"));
    }

    #[test]
    fn test_agent_type_labels() {
        assert_eq!(AgentType::Main.as_str(), "main");
        assert_eq!(AgentType::Subagent.as_str(), "subagent");
        assert_eq!(AgentType::Heartbeat.as_str(), "heartbeat");
        assert_eq!(AgentType::Cron.as_str(), "cron");
    }

    #[test]
    fn test_request_context_subagent_child() {
        let ctx = RequestContext::new(AgentType::Main)
            .with_workspace("family")
            .with_channel("telegram");
        let child = ctx.subagent_child();
        assert_eq!(child.agent_type, AgentType::Subagent);
        assert_eq!(child.workspace, "family");
        assert_eq!(child.channel, "telegram");
        assert_ne!(child.trace_id, ctx.trace_id);
    }

    #[test]
    fn test_global_recorder_accessible() {
        recorder().record_message("cli", "inbound");
        assert!(recorder().messages_total.get(&["cli", "inbound"]) >= 1);
    }
}
