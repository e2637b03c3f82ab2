//! Session key derivation.
//!
//! A session key is a stable, loggable identifier for one isolated
//! conversation thread. Two messages share a session iff their keys are
//! byte-equal. The key is a pure function of the routing parameters and
//! never contains secrets.

use serde::{Deserialize, Serialize};

use crate::error::{PicoError, Result};

/// Scope controlling how direct-message sessions are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DmScope {
    /// One session per peer, shared across channels and agents.
    PerPeer,
    /// One session per (channel, peer) pair. The default.
    #[default]
    PerChannelPeer,
    /// One session per (agent, peer) pair, shared across channels.
    PerAgentPeer,
}

/// The kind and identity of the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Peer kind: "user", "group", "direct", ...
    pub kind: String,
    /// Peer identity within the channel.
    pub id: String,
}

impl Peer {
    pub fn new(kind: &str, id: &str) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Shorthand for `Peer::new("user", id)`.
    pub fn user(id: &str) -> Self {
        Self::new("user", id)
    }

    /// Shorthand for `Peer::new("direct", id)` — used by webhooks and CLI.
    pub fn direct(id: &str) -> Self {
        Self::new("direct", id)
    }
}

/// Routing parameters from which a session key is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyParams {
    pub agent_id: String,
    pub channel: String,
    pub peer: Peer,
    pub dm_scope: DmScope,
}

/// Build the session key for the given routing parameters.
///
/// The key layout per scope:
/// - `PerPeer`:        `peer:<kind>:<id>`
/// - `PerChannelPeer`: `<agent>:<channel>:<kind>:<id>`
/// - `PerAgentPeer`:   `<agent>:<kind>:<id>`
///
/// # Errors
/// Returns `ConfigError` when the agent id is empty.
///
/// # Example
/// ```
/// use picoclaw::session::key::{build_session_key, DmScope, Peer, SessionKeyParams};
///
/// let key = build_session_key(&SessionKeyParams {
///     agent_id: "main".into(),
///     channel: "telegram".into(),
///     peer: Peer::user("42"),
///     dm_scope: DmScope::PerChannelPeer,
/// })
/// .unwrap();
/// assert_eq!(key, "main:telegram:user:42");
/// ```
pub fn build_session_key(params: &SessionKeyParams) -> Result<String> {
    if params.agent_id.is_empty() {
        return Err(PicoError::Config(
            "session key requires a non-empty agent id".into(),
        ));
    }

    let key = match params.dm_scope {
        DmScope::PerPeer => format!("peer:{}:{}", params.peer.kind, params.peer.id),
        DmScope::PerChannelPeer => format!(
            "{}:{}:{}:{}",
            params.agent_id, params.channel, params.peer.kind, params.peer.id
        ),
        DmScope::PerAgentPeer => format!(
            "{}:{}:{}",
            params.agent_id, params.peer.kind, params.peer.id
        ),
    };
    Ok(key)
}
