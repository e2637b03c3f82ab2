//! Message types for the PicoClaw message bus
//!
//! This module defines the core message types used for communication
//! between channel adapters, the agent loop, and the gateway surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents an incoming message from a channel (Telegram, Discord, webhook, CLI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The channel this message came from (e.g., "telegram", "webhook")
    pub channel: String,
    /// Unique identifier of the sender
    pub sender_id: String,
    /// Unique identifier of the chat/conversation
    pub chat_id: String,
    /// The text content of the message
    pub content: String,
    /// Optional media attachment
    pub media: Option<MediaAttachment>,
    /// Derived session key used to route this message to a conversation
    pub session_key: String,
    /// When the message arrived at the gateway
    pub timestamp: DateTime<Utc>,
    /// Additional metadata key-value pairs
    pub metadata: HashMap<String, String>,
}

/// Represents an outgoing message to be sent via a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// The channel to send this message through
    pub channel: String,
    /// The chat/conversation to send to
    pub chat_id: String,
    /// The text content to send
    pub content: String,
    /// Optional message ID to reply to
    pub reply_to: Option<String>,
}

/// Represents a media attachment carried on an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub media_type: MediaType,
    /// URL to the media (if hosted remotely)
    pub url: Option<String>,
    /// Original filename
    pub filename: Option<String>,
}

/// Types of media that can be attached to messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Audio,
    Video,
    Document,
}

impl InboundMessage {
    /// Creates a new inbound message with the required fields.
    ///
    /// The session key defaults to `"channel:chat_id"`; callers that route
    /// per agent/peer overwrite it with [`with_session_key`].
    ///
    /// # Example
    /// ```
    /// use picoclaw::bus::InboundMessage;
    ///
    /// let msg = InboundMessage::new("telegram", "user123", "chat456", "Hello, bot!");
    /// assert_eq!(msg.session_key, "telegram:chat456");
    /// ```
    ///
    /// [`with_session_key`]: InboundMessage::with_session_key
    pub fn new(channel: &str, sender_id: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            media: None,
            session_key: format!("{}:{}", channel, chat_id),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Overrides the derived session key (builder pattern).
    pub fn with_session_key(mut self, key: &str) -> Self {
        self.session_key = key.to_string();
        self
    }

    /// Attaches media to the message (builder pattern).
    pub fn with_media(mut self, media: MediaAttachment) -> Self {
        self.media = Some(media);
        self
    }

    /// Adds a metadata key-value pair to the message (builder pattern).
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Checks if this message has any media attached.
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }
}

impl OutboundMessage {
    /// Creates a new outbound message.
    pub fn new(channel: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            reply_to: None,
        }
    }

    /// Sets the message ID to reply to (builder pattern).
    pub fn with_reply(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }

    /// Creates an outbound message as a response to an inbound message.
    ///
    /// # Example
    /// ```
    /// use picoclaw::bus::{InboundMessage, OutboundMessage};
    ///
    /// let inbound = InboundMessage::new("telegram", "user123", "chat456", "Hello");
    /// let response = OutboundMessage::reply_to(&inbound, "Hello back!");
    /// assert_eq!(response.channel, "telegram");
    /// assert_eq!(response.chat_id, "chat456");
    /// ```
    pub fn reply_to(msg: &InboundMessage, content: &str) -> Self {
        Self::new(&msg.channel, &msg.chat_id, content)
    }
}

impl MediaAttachment {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            url: None,
            filename: None,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }
}
