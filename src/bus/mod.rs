//! Message Bus Module
//!
//! This module provides the core message bus infrastructure for PicoClaw.
//! The `MessageBus` routes inbound messages (from channel adapters to the
//! agent loop) and outbound messages (from the agent loop back to channels),
//! and mirrors everything into the activity log that feeds the dashboard.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Channel   │────>│  MessageBus │────>│  AgentLoop  │
//! │  (adapter)  │     │  (inbound)  │     └─────────────┘
//! └─────────────┘     └──────┬──────┘
//!                            │ outbound          ┌───────────┐
//!                            ▼                   │ Dashboard │
//!                     ┌─────────────┐  monitor   └─────▲─────┘
//!                     │  MessageBus │────────────────────┘
//!                     └─────────────┘
//! ```
//!
//! Publication never blocks: channels are `tokio::sync::broadcast`, so a
//! slow subscriber lags and loses its oldest pending events rather than
//! back-pressuring publishers. Every dropped event increments the bus drop
//! counter exposed through [`MessageBus::drop_count`].

pub mod activity;
pub mod message;

pub use activity::{ActivityDirection, ActivityEvent, ActivityLog, DEFAULT_ACTIVITY_CAPACITY};
pub use message::{InboundMessage, MediaAttachment, MediaType, OutboundMessage};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{PicoError, Result};

/// Default buffer size per subscriber.
const DEFAULT_BUFFER_SIZE: usize = 128;

/// A subscription to one side of the bus.
///
/// `recv()` hides broadcast lag: when the subscriber has fallen behind and
/// events were discarded, the drop counter is bumped and the receive is
/// retried, so callers only ever see messages or end-of-stream.
pub struct BusSubscription<T> {
    rx: broadcast::Receiver<T>,
    drops: Arc<AtomicU64>,
}

impl<T: Clone> BusSubscription<T> {
    /// Receive the next message, or `None` when the bus is closed.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.drops.fetch_add(n, Ordering::Relaxed);
                    warn!(dropped = n, "Bus subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The central message bus.
///
/// Cloning is cheap and shares the underlying channels; every component
/// holds its own clone.
#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: broadcast::Sender<InboundMessage>,
    outbound_tx: broadcast::Sender<OutboundMessage>,
    activity: ActivityLog,
    drops: Arc<AtomicU64>,
}

impl MessageBus {
    /// Creates a new `MessageBus` with default buffer sizes.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Creates a new `MessageBus` with a custom per-subscriber buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (inbound_tx, _) = broadcast::channel(buffer_size.max(1));
        let (outbound_tx, _) = broadcast::channel(buffer_size.max(1));
        Self {
            inbound_tx,
            outbound_tx,
            activity: ActivityLog::default(),
            drops: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publishes an inbound message. Never blocks.
    ///
    /// # Errors
    /// Returns `PicoError::BusClosed` if no subscriber exists.
    pub fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.activity.record(ActivityEvent::new(
            ActivityDirection::Inbound,
            &msg.channel,
            &msg.chat_id,
            &msg.content,
        ));
        self.inbound_tx
            .send(msg)
            .map(|_| ())
            .map_err(|_| PicoError::BusClosed)
    }

    /// Publishes an outbound message. Never blocks.
    ///
    /// # Errors
    /// Returns `PicoError::BusClosed` if no subscriber exists.
    pub fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        self.activity.record(ActivityEvent::new(
            ActivityDirection::Outbound,
            &msg.channel,
            &msg.chat_id,
            &msg.content,
        ));
        self.outbound_tx
            .send(msg)
            .map(|_| ())
            .map_err(|_| PicoError::BusClosed)
    }

    /// Subscribe to inbound messages. Each subscriber sees every message
    /// published after the subscription, FIFO.
    pub fn subscribe_inbound(&self) -> BusSubscription<InboundMessage> {
        BusSubscription {
            rx: self.inbound_tx.subscribe(),
            drops: Arc::clone(&self.drops),
        }
    }

    /// Subscribe to outbound messages (consumed by channel adapters).
    pub fn subscribe_outbound(&self) -> BusSubscription<OutboundMessage> {
        BusSubscription {
            rx: self.outbound_tx.subscribe(),
            drops: Arc::clone(&self.drops),
        }
    }

    /// Snapshot of recent bus activity for the dashboard.
    pub fn monitor(&self) -> Vec<ActivityEvent> {
        self.activity.snapshot()
    }

    /// Total events dropped because of slow subscribers.
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_inbound_flow() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe_inbound();

        let msg = InboundMessage::new("telegram", "user123", "chat456", "Hello");
        bus.publish_inbound(msg).unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.content, "Hello");
        assert_eq!(received.channel, "telegram");
        assert_eq!(received.sender_id, "user123");
    }

    #[tokio::test]
    async fn test_bus_outbound_flow() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe_outbound();

        bus.publish_outbound(OutboundMessage::new("telegram", "chat456", "Response"))
            .unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.content, "Response");
        assert_eq!(received.chat_id, "chat456");
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_bus_closed() {
        let bus = MessageBus::new();
        let msg = InboundMessage::new("test", "u", "c", "hello");
        let result = bus.publish_inbound(msg);
        assert!(matches!(result, Err(PicoError::BusClosed)));
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe_inbound();

        for i in 0..5 {
            let msg = InboundMessage::new("telegram", "user", "chat", &format!("Message {}", i));
            bus.publish_inbound(msg).unwrap();
        }

        for i in 0..5 {
            let received = sub.recv().await.unwrap();
            assert_eq!(received.content, format!("Message {}", i));
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = MessageBus::with_buffer_size(4);
        let mut sub = bus.subscribe_inbound();

        // Publish more than the buffer holds before the subscriber reads.
        for i in 0..10 {
            let msg = InboundMessage::new("test", "user", "chat", &format!("m{}", i));
            bus.publish_inbound(msg).unwrap();
        }

        // The subscriber resumes at the oldest retained event; drops counted.
        let first = sub.recv().await.unwrap();
        assert_eq!(first.content, "m6");
        assert_eq!(bus.drop_count(), 6);
    }

    #[tokio::test]
    async fn test_two_subscribers_both_receive() {
        let bus = MessageBus::new();
        let mut a = bus.subscribe_inbound();
        let mut b = bus.subscribe_inbound();

        bus.publish_inbound(InboundMessage::new("cli", "u", "c", "broadcast"))
            .unwrap();

        assert_eq!(a.recv().await.unwrap().content, "broadcast");
        assert_eq!(b.recv().await.unwrap().content, "broadcast");
    }

    #[tokio::test]
    async fn test_monitor_records_both_directions() {
        let bus = MessageBus::new();
        let _in_sub = bus.subscribe_inbound();
        let _out_sub = bus.subscribe_outbound();

        bus.publish_inbound(InboundMessage::new("cli", "u", "c", "ping"))
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("cli", "c", "pong"))
            .unwrap();

        let events = bus.monitor();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].direction, ActivityDirection::Inbound);
        assert_eq!(events[1].direction, ActivityDirection::Outbound);
    }

    #[tokio::test]
    async fn test_bus_clone_shares_channels() {
        let bus1 = MessageBus::new();
        let bus2 = bus1.clone();
        let mut sub = bus1.subscribe_inbound();

        bus2.publish_inbound(InboundMessage::new("cli", "u", "c", "via clone"))
            .unwrap();
        assert_eq!(sub.recv().await.unwrap().content, "via clone");
    }
}
