//! Session module - Session and conversation state management
//!
//! Sessions live in memory for the lifetime of the process. A session is
//! created on the first message bearing a novel key and rotated when its
//! token estimate crosses the configured threshold, its TTL elapses, or the
//! user sends `/reset`. Rotation hands the old session back to the caller so
//! it can be archived into long-term memory before the fresh one starts.
//!
//! # Example
//!
//! ```
//! use picoclaw::session::{Message, SessionManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = SessionManager::new();
//!
//!     let mut session = manager.get_or_create("main:cli:direct:local").await;
//!     session.add_message(Message::user("Hello!"));
//!     manager.save(session).await;
//! }
//! ```

pub mod key;
pub mod types;

pub use key::{build_session_key, DmScope, Peer, SessionKeyParams};
pub use types::{Message, Role, Session, ToolCall};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::RwLock;

/// Default rotation threshold in estimated tokens.
const DEFAULT_TOKEN_THRESHOLD: usize = 60_000;

/// Default session TTL in seconds (24 hours).
const DEFAULT_TTL_SECS: i64 = 86_400;

/// Why a session was rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// Estimated token count crossed the threshold.
    TokenBudget,
    /// The session sat idle past its TTL.
    Ttl,
    /// The user sent an explicit `/reset`.
    Reset,
}

impl RotationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationReason::TokenBudget => "token_budget",
            RotationReason::Ttl => "ttl",
            RotationReason::Reset => "reset",
        }
    }
}

/// In-memory session store with rotation policy.
///
/// Cloning shares the underlying map; the manager is safe to use from
/// concurrent tasks.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    token_threshold: usize,
    ttl: Duration,
}

impl SessionManager {
    /// Create a session manager with default rotation policy.
    pub fn new() -> Self {
        Self::with_policy(DEFAULT_TOKEN_THRESHOLD, DEFAULT_TTL_SECS)
    }

    /// Create a session manager with an explicit rotation policy.
    ///
    /// # Arguments
    /// * `token_threshold` - estimated-token budget before rotation
    /// * `ttl_secs` - idle seconds before rotation
    pub fn with_policy(token_threshold: usize, ttl_secs: i64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            token_threshold,
            ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    /// Get an existing session or create a new empty one under `key`.
    pub async fn get_or_create(&self, key: &str) -> Session {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(key) {
                return session.clone();
            }
        }

        let session = Session::new(key);
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(key.to_string())
            .or_insert_with(|| session.clone())
            .clone()
    }

    /// Get a session by key without creating it.
    pub async fn get(&self, key: &str) -> Option<Session> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Save a session back into the store.
    pub async fn save(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.key.clone(), session);
    }

    /// Remove a session, returning it if present.
    pub async fn remove(&self, key: &str) -> Option<Session> {
        self.sessions.write().await.remove(key)
    }

    /// Decide whether the given session is due for rotation.
    ///
    /// `reset_requested` reflects an observed `/reset` command this turn.
    pub fn rotation_reason(
        &self,
        session: &Session,
        reset_requested: bool,
    ) -> Option<RotationReason> {
        if reset_requested {
            return Some(RotationReason::Reset);
        }
        if session.estimated_tokens() > self.token_threshold {
            return Some(RotationReason::TokenBudget);
        }
        if session.idle_duration() > self.ttl {
            return Some(RotationReason::Ttl);
        }
        None
    }

    /// Rotate the session under `key`: remove the old state and return it
    /// for archival. The next `get_or_create` starts a fresh session under
    /// the same key.
    pub async fn rotate(&self, key: &str) -> Option<Session> {
        self.remove(key).await
    }

    /// Number of live sessions.
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Keys of all live sessions, for the status endpoint.
    pub async fn active_keys(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_get_or_create_new() {
        let manager = SessionManager::new();
        let session = manager.get_or_create("test-session").await;
        assert_eq!(session.key, "test-session");
        assert!(session.messages.is_empty());
        assert_eq!(manager.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_or_create_existing() {
        let manager = SessionManager::new();
        let mut session = manager.get_or_create("test").await;
        session.add_message(Message::user("Hello"));
        manager.save(session).await;

        let loaded = manager.get_or_create("test").await;
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let manager = SessionManager::new();
        assert!(manager.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let manager = SessionManager::new();
        manager.get_or_create("gone").await;
        assert!(manager.remove("gone").await.is_some());
        assert!(manager.get("gone").await.is_none());
    }

    #[tokio::test]
    async fn test_rotation_reason_reset_wins() {
        let manager = SessionManager::new();
        let session = manager.get_or_create("s").await;
        assert_eq!(
            manager.rotation_reason(&session, true),
            Some(RotationReason::Reset)
        );
    }

    #[tokio::test]
    async fn test_rotation_reason_token_budget() {
        let manager = SessionManager::with_policy(10, DEFAULT_TTL_SECS);
        let mut session = manager.get_or_create("s").await;
        session.add_message(Message::user(&"x".repeat(100)));
        assert_eq!(
            manager.rotation_reason(&session, false),
            Some(RotationReason::TokenBudget)
        );
    }

    #[tokio::test]
    async fn test_rotation_reason_none_when_fresh() {
        let manager = SessionManager::new();
        let mut session = manager.get_or_create("s").await;
        session.add_message(Message::user("short"));
        assert_eq!(manager.rotation_reason(&session, false), None);
    }

    #[tokio::test]
    async fn test_rotation_reason_ttl() {
        let manager = SessionManager::with_policy(DEFAULT_TOKEN_THRESHOLD, 1);
        let mut session = manager.get_or_create("s").await;
        // Back-date the last activity beyond the 1s TTL.
        session.updated_at = Utc::now() - Duration::seconds(5);
        assert_eq!(
            manager.rotation_reason(&session, false),
            Some(RotationReason::Ttl)
        );
    }

    #[tokio::test]
    async fn test_rotate_returns_old_and_restarts_fresh() {
        let manager = SessionManager::new();
        let mut session = manager.get_or_create("s").await;
        session.add_message(Message::user("history"));
        manager.save(session).await;

        let old = manager.rotate("s").await.unwrap();
        assert_eq!(old.messages.len(), 1);

        let fresh = manager.get_or_create("s").await;
        assert!(fresh.messages.is_empty());
    }

    #[test]
    fn test_rotation_reason_labels() {
        assert_eq!(RotationReason::TokenBudget.as_str(), "token_budget");
        assert_eq!(RotationReason::Ttl.as_str(), "ttl");
        assert_eq!(RotationReason::Reset.as_str(), "reset");
    }
}
