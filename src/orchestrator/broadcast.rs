//! Session status fan-out.
//!
//! Every status change is published twice: once to the unscoped audience
//! and once to the audience scoped to the session. Both copies go through
//! a single channel so a subscriber sees them in send order.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::session::SessionStatus;

/// Who a broadcast is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "session_id", rename_all = "snake_case")]
pub enum Audience {
    /// Every listener.
    All,
    /// Listeners following one session.
    Session(String),
}

/// A `SessionStatusChanged` signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusBroadcast {
    /// Intended audience.
    pub audience: Audience,
    /// Session whose status changed.
    pub session_id: String,
    /// New status.
    pub status: SessionStatus,
}

/// Status broadcast hub backed by a `tokio` broadcast channel.
#[derive(Debug, Clone)]
pub struct StatusHub {
    tx: broadcast::Sender<StatusBroadcast>,
}

impl StatusHub {
    /// Create a hub with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every broadcast, both audiences.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusBroadcast> {
        self.tx.subscribe()
    }

    /// Publish a status change to the unscoped then the session audience.
    ///
    /// Having no subscribers is not an error.
    pub fn broadcast_status(&self, session_id: &str, status: SessionStatus) {
        for audience in [Audience::All, Audience::Session(session_id.to_owned())] {
            let signal = StatusBroadcast {
                audience,
                session_id: session_id.to_owned(),
                status,
            };
            if self.tx.send(signal).is_err() {
                debug!(session_id, ?status, "no status subscribers");
                return;
            }
        }
        debug!(session_id, ?status, "status broadcast");
    }
}
