//! Heartbeat service.
//!
//! At a fixed cadence, reads `HEARTBEAT.md` in the workspace and, when it
//! has actionable content, runs the probe prompt through the agent loop.
//! A reply of exactly `HEARTBEAT_OK` is a silent ping and is swallowed;
//! anything else is forwarded through the bus to the configured channel.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::bus::{MessageBus, OutboundMessage};
use crate::error::Result;
use crate::metrics::recorder;

/// Sentinel reply marking an uneventful heartbeat.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Prompt sent to the agent when the heartbeat fires.
pub const HEARTBEAT_PROMPT: &str = "Read HEARTBEAT.md in your workspace (if it exists).\n\
Follow any actionable items listed there.\n\
If nothing needs attention, reply with: HEARTBEAT_OK";

/// Handler that runs the probe prompt through the agent loop.
pub type HeartbeatHandler =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<String>> + Send>> + Send + Sync>;

/// Background service that periodically probes the agent.
pub struct HeartbeatService {
    file_path: PathBuf,
    interval: Duration,
    bus: MessageBus,
    handler: HeartbeatHandler,
    channel: String,
    chat_id: String,
    workspace: String,
    running: Arc<RwLock<bool>>,
    consecutive_failures: Arc<AtomicU32>,
    failure_alert_threshold: u32,
}

impl HeartbeatService {
    /// Create a new heartbeat service.
    ///
    /// `channel`/`chat_id` name where non-silent replies are delivered.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_path: PathBuf,
        interval_secs: u64,
        bus: MessageBus,
        handler: HeartbeatHandler,
        channel: &str,
        chat_id: &str,
        workspace: &str,
    ) -> Self {
        Self {
            file_path,
            interval: Duration::from_secs(interval_secs.max(30)),
            bus,
            handler,
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            workspace: workspace.to_string(),
            running: Arc::new(RwLock::new(false)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            failure_alert_threshold: 3,
        }
    }

    /// Start the tick loop in the background (idempotent).
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Heartbeat service already running");
                return Ok(());
            }
            *running = true;
        }

        info!(
            interval_secs = self.interval.as_secs(),
            file = %self.file_path.display(),
            "Heartbeat service started"
        );

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !*service.running.read().await {
                    info!("Heartbeat service stopped");
                    break;
                }

                let ok = service.tick().await;
                if ok {
                    service.consecutive_failures.store(0, Ordering::Relaxed);
                } else {
                    let count = service.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if count >= service.failure_alert_threshold {
                        warn!(
                            consecutive_failures = count,
                            "Heartbeat degraded: consecutive failures"
                        );
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the tick loop.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures() < self.failure_alert_threshold
    }

    /// Whether heartbeat file content has anything actionable.
    pub fn is_empty(content: &str) -> bool {
        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("<!--") {
                continue;
            }
            if line == "- [ ]" || line == "* [ ]" {
                continue;
            }
            return false;
        }
        true
    }

    /// Run one heartbeat. Returns `false` on failure.
    pub async fn tick(&self) -> bool {
        match tokio::fs::read_to_string(&self.file_path).await {
            Ok(content) => {
                if Self::is_empty(&content) {
                    debug!("Heartbeat file has no actionable content");
                    recorder().record_heartbeat("skipped", &self.workspace);
                    return true;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %self.file_path.display(), "Heartbeat file missing, skipping tick");
                recorder().record_heartbeat("skipped", &self.workspace);
                return true;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read heartbeat file");
                recorder().record_heartbeat("error", &self.workspace);
                return false;
            }
        }

        match (self.handler)(HEARTBEAT_PROMPT.to_string()).await {
            Ok(reply) => {
                if reply.trim() == HEARTBEAT_OK {
                    debug!("Heartbeat OK, swallowing silent ping");
                    recorder().record_heartbeat("ok", &self.workspace);
                    return true;
                }
                recorder().record_heartbeat("actionable", &self.workspace);
                let outbound = OutboundMessage::new(&self.channel, &self.chat_id, &reply);
                if let Err(e) = self.bus.publish_outbound(outbound) {
                    error!(error = %e, "Failed to forward heartbeat reply");
                    return false;
                }
                true
            }
            Err(e) => {
                error!(error = %e, "Heartbeat probe failed");
                recorder().record_heartbeat("error", &self.workspace);
                false
            }
        }
    }
}
