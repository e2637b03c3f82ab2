//! Cron management tool.
//!
//! Lets the LLM schedule, inspect and remove reminder jobs on behalf of the
//! user. Job payloads target the originating channel so results land where
//! the request was made.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cron::{parse_at_datetime_ms, CronPayload, CronSchedule, CronService};
use crate::error::{PicoError, Result};

use super::types::{Tool, ToolContext, ToolOutput};

/// `cron`: manage scheduled jobs.
pub struct CronTool {
    service: Arc<CronService>,
}

impl CronTool {
    pub fn new(service: Arc<CronService>) -> Self {
        Self { service }
    }

    fn parse_schedule(args: &Value) -> Result<CronSchedule> {
        if let Some(at) = args.get("at").and_then(Value::as_str) {
            return Ok(CronSchedule::At {
                at_ms: parse_at_datetime_ms(at)?,
            });
        }
        if let Some(every) = args.get("every_seconds").and_then(Value::as_i64) {
            if every <= 0 {
                return Err(PicoError::Tool("'every_seconds' must be positive".into()));
            }
            return Ok(CronSchedule::Every {
                every_ms: every * 1000,
            });
        }
        if let Some(expr) = args.get("cron").and_then(Value::as_str) {
            if !crate::cron::is_valid_cron_expr(expr) {
                return Err(PicoError::Tool(format!("invalid cron expression '{}'", expr)));
            }
            return Ok(CronSchedule::Cron {
                expr: expr.to_string(),
            });
        }
        Err(PicoError::Tool(
            "provide one of 'at', 'every_seconds' or 'cron'".into(),
        ))
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Manage scheduled jobs: add a reminder or recurring prompt, list \
         existing jobs, or remove one by id."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove"],
                    "description": "What to do"
                },
                "name": {
                    "type": "string",
                    "description": "Job name (add)"
                },
                "message": {
                    "type": "string",
                    "description": "Prompt injected when the job fires (add)"
                },
                "at": {
                    "type": "string",
                    "description": "One-shot RFC3339 instant (add)"
                },
                "every_seconds": {
                    "type": "integer",
                    "description": "Recurring interval in seconds (add)"
                },
                "cron": {
                    "type": "string",
                    "description": "Five-field cron expression (add)"
                },
                "job_id": {
                    "type": "string",
                    "description": "Job id (remove)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let action = args
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| PicoError::Tool("missing 'action' argument".into()))?;

        match action {
            "add" => {
                let name = args
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unnamed")
                    .to_string();
                let message = args
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PicoError::Tool("missing 'message' argument".into()))?
                    .to_string();
                let schedule = Self::parse_schedule(&args)?;
                let one_shot = matches!(schedule, CronSchedule::At { .. });

                let payload = CronPayload {
                    message,
                    channel: ctx.channel.clone().unwrap_or_else(|| "cli".to_string()),
                    chat_id: ctx.chat_id.clone().unwrap_or_else(|| "direct".to_string()),
                };
                let job = self
                    .service
                    .add_job(name, schedule, payload, one_shot)
                    .await?;
                Ok(ToolOutput::llm_only(format!(
                    "Scheduled job '{}' (id: {}).",
                    job.name, job.id
                )))
            }
            "list" => {
                let jobs = self.service.list_jobs(false).await;
                if jobs.is_empty() {
                    return Ok(ToolOutput::llm_only("No scheduled jobs."));
                }
                let mut out = String::new();
                for job in jobs {
                    let next = job
                        .state
                        .next_run_at_ms
                        .and_then(chrono::DateTime::from_timestamp_millis)
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|| "unscheduled".to_string());
                    out.push_str(&format!("- {} (id: {}) next: {}\n", job.name, job.id, next));
                }
                Ok(ToolOutput::llm_only(out))
            }
            "remove" => {
                let job_id = args
                    .get("job_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PicoError::Tool("missing 'job_id' argument".into()))?;
                if self.service.remove_job(job_id).await? {
                    Ok(ToolOutput::llm_only(format!("Removed job {}.", job_id)))
                } else {
                    Ok(ToolOutput::error(format!("No job with id {}.", job_id)))
                }
            }
            other => Err(PicoError::Tool(format!("unknown action '{}'", other))),
        }
    }
}
