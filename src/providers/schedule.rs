//! Schedule-based provider routing.
//!
//! Wraps a set of named providers and picks one per call based on the
//! current weekday and time of day in the configured timezone. The first
//! matching rule wins; with no match the default target applies.
//!
//! Day names accept `mon..sun` plus the aliases `weekday` (mon-fri) and
//! `weekend` (sat/sun). Hour ranges are `HH:MM`; a range whose end is before
//! its start spans midnight and matches when `now >= start || now < end`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use tracing::warn;

use crate::config::{ScheduleConfig, ScheduleRule};
use crate::error::{PicoError, Result};
use crate::metrics::RequestContext;
use crate::session::Message;

use super::{ChatOptions, LLMProvider, LLMResponse, ToolDefinition};

/// Clock source, swappable in tests.
type NowFn = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Provider router driven by a weekly schedule.
pub struct ScheduleProvider {
    schedule: ScheduleConfig,
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    offset: FixedOffset,
    now_fn: NowFn,
}

impl ScheduleProvider {
    /// Create a schedule provider.
    ///
    /// # Arguments
    /// * `schedule` - rules plus default target
    /// * `providers` - resolvable providers keyed by their id
    ///
    /// The timezone comes from `schedule.utc_offset_minutes` (0 = UTC).
    pub fn new(
        schedule: ScheduleConfig,
        providers: HashMap<String, Arc<dyn LLMProvider>>,
    ) -> Result<Self> {
        let offset = FixedOffset::east_opt(schedule.utc_offset_minutes * 60).ok_or_else(|| {
            PicoError::Config(format!(
                "invalid schedule utc offset: {} minutes",
                schedule.utc_offset_minutes
            ))
        })?;
        Ok(Self {
            schedule,
            providers,
            offset,
            now_fn: Box::new(Utc::now),
        })
    }

    /// Replace the clock, for tests.
    #[cfg(test)]
    pub fn with_now_fn(mut self, now_fn: NowFn) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Find the first rule matching instant `t`, if any.
    pub fn match_rule(&self, t: DateTime<Utc>) -> Option<&ScheduleRule> {
        let local = t.with_timezone(&self.offset);
        let weekday = weekday_label(local.weekday());
        let now_mins = local.hour() * 60 + local.minute();

        self.schedule.rules.iter().find(|rule| {
            if !rule.days.is_empty() && !day_matches(&rule.days, weekday) {
                return false;
            }
            if let Some(hours) = &rule.hours {
                let (start, end) = match (parse_hhmm(&hours.start), parse_hhmm(&hours.end)) {
                    (Some(s), Some(e)) => (s, e),
                    _ => {
                        warn!(
                            start = %hours.start,
                            end = %hours.end,
                            "Invalid hour range in schedule rule, skipping"
                        );
                        return false;
                    }
                };
                let matched = if start <= end {
                    now_mins >= start && now_mins < end
                } else {
                    // Overnight span: after start or before end.
                    now_mins >= start || now_mins < end
                };
                if !matched {
                    return false;
                }
            }
            true
        })
    }

    /// Resolve the provider and model active at instant `t`.
    fn resolve(&self, t: DateTime<Utc>) -> Result<(Arc<dyn LLMProvider>, String)> {
        let (provider_id, model) = match self.match_rule(t) {
            Some(rule) => (rule.provider.clone(), rule.model.clone()),
            None => (
                self.schedule.default.provider.clone(),
                self.schedule.default.model.clone(),
            ),
        };

        if provider_id.starts_with("schedule") {
            return Err(PicoError::Config(
                "recursive schedule provider not allowed".into(),
            ));
        }

        let provider = self
            .providers
            .get(&provider_id)
            .cloned()
            .ok_or_else(|| PicoError::NotFound(format!("provider '{}'", provider_id)))?;
        Ok((provider, model))
    }
}

#[async_trait]
impl LLMProvider for ScheduleProvider {
    fn name(&self) -> &str {
        "schedule"
    }

    fn default_model(&self) -> &str {
        &self.schedule.default.model
    }

    async fn chat(
        &self,
        ctx: &RequestContext,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let (provider, rule_model) = self.resolve((self.now_fn)())?;

        // The rule's model wins; the caller's override applies only when the
        // rule leaves the model blank.
        let target = if !rule_model.is_empty() {
            Some(rule_model.as_str())
        } else {
            model
        };
        provider.chat(ctx, messages, tools, target, options).await
    }
}

fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn day_matches(days: &[String], weekday: &str) -> bool {
    days.iter().any(|d| {
        let d = d.to_lowercase();
        d == weekday
            || (d == "weekday" && weekday != "sat" && weekday != "sun")
            || (d == "weekend" && (weekday == "sat" || weekday == "sun"))
    })
}

/// Parse "HH:MM" into minutes since midnight.
fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}
