//! Activity event log backing the dashboard `/api/activity` endpoint.
//!
//! Every bus publication is mirrored into a bounded ring buffer. Overflow
//! evicts the oldest event; the buffer never exceeds its configured capacity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default capacity of the activity ring buffer.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 100;

/// Direction of a message as it crossed the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityDirection {
    Inbound,
    Outbound,
}

/// A single activity event as shown on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub direction: ActivityDirection,
    pub channel: String,
    pub chat_id: String,
    /// First 200 chars of the message content.
    pub preview: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(direction: ActivityDirection, channel: &str, chat_id: &str, content: &str) -> Self {
        let preview: String = content.chars().take(200).collect();
        Self {
            direction,
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            preview,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded, thread-safe ring buffer of recent activity events.
#[derive(Clone)]
pub struct ActivityLog {
    events: Arc<Mutex<VecDeque<ActivityEvent>>>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Record an event, evicting the oldest when the buffer is full.
    pub fn record(&self, event: ActivityEvent) {
        let mut events = self.events.lock().unwrap();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of the buffered events, oldest first.
    pub fn snapshot(&self) -> Vec<ActivityEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY)
    }
}
