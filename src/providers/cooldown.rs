//! Per `(provider, model)` cooldown tracking for the fallback chain.
//!
//! A pair that failed with a retriable error is skipped (not retried) until
//! its cooldown expires. Backoff grows exponentially with consecutive
//! failures, gets a small random jitter, and is capped per failure kind.
//! Success clears all state for the pair.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::ProviderErrorKind;

/// Base backoff and cap per failure kind, in seconds.
fn backoff_bounds(kind: ProviderErrorKind) -> (u64, u64) {
    match kind {
        ProviderErrorKind::RateLimit => (60, 1800),
        ProviderErrorKind::TokenLimit => (30, 600),
        ProviderErrorKind::Timeout => (15, 120),
        ProviderErrorKind::Transient => (30, 300),
        // Non-retriable kinds abort the chain before cooldown applies, but a
        // short cooldown still guards against repeated probing.
        ProviderErrorKind::Auth | ProviderErrorKind::Fatal => (300, 300),
    }
}

/// Backoff duration for the given kind and consecutive failure count.
///
/// Exponential in `consecutive`, plus up to 10% random jitter, capped.
pub fn backoff(kind: ProviderErrorKind, consecutive: u32) -> Duration {
    let (base, cap) = backoff_bounds(kind);
    let exp = base.saturating_mul(2u64.saturating_pow(consecutive.saturating_sub(1)));
    let capped = exp.min(cap);
    let jitter_ceiling = (capped / 10).max(1);
    let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
    Duration::from_secs((capped + jitter).min(cap + jitter_ceiling))
}

#[derive(Debug)]
struct CooldownEntry {
    consecutive: u32,
    cooldown_until: Option<Instant>,
    last_failure: Option<Instant>,
}

impl CooldownEntry {
    fn new() -> Self {
        Self {
            consecutive: 0,
            cooldown_until: None,
            last_failure: None,
        }
    }

    fn is_in_cooldown(&self) -> bool {
        self.cooldown_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    fn reset_if_stale(&mut self) {
        if let Some(last) = self.last_failure {
            if last.elapsed() > Duration::from_secs(86_400) {
                self.consecutive = 0;
                self.cooldown_until = None;
            }
        }
    }
}

/// Thread-safe cooldown tracker keyed by `(provider, model)`.
#[derive(Clone)]
pub struct CooldownTracker {
    entries: Arc<RwLock<HashMap<(String, String), CooldownEntry>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns `true` if the pair is currently in cooldown and must be
    /// skipped by the fallback chain.
    pub fn is_in_cooldown(&self, provider: &str, model: &str) -> bool {
        let entries = self.entries.read().unwrap();
        entries
            .get(&(provider.to_string(), model.to_string()))
            .map(|e| e.is_in_cooldown())
            .unwrap_or(false)
    }

    /// Record a failure; sets `cooldown_until = now + backoff(kind, n)`.
    pub fn mark_failure(&self, provider: &str, model: &str, kind: ProviderErrorKind) {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .entry((provider.to_string(), model.to_string()))
            .or_insert_with(CooldownEntry::new);
        entry.reset_if_stale();
        entry.consecutive += 1;
        entry.last_failure = Some(Instant::now());
        entry.cooldown_until = Some(Instant::now() + backoff(kind, entry.consecutive));
    }

    /// Record a success — clears all cooldown state for the pair.
    pub fn mark_success(&self, provider: &str, model: &str) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(&(provider.to_string(), model.to_string())) {
            entry.consecutive = 0;
            entry.cooldown_until = None;
        }
    }

    /// Number of pairs currently in cooldown, for the gauge.
    pub fn active_count(&self) -> usize {
        let entries = self.entries.read().unwrap();
        entries.values().filter(|e| e.is_in_cooldown()).count()
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new()
    }
}
