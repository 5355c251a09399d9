use std::collections::HashMap;

use shared::{
    domain::{ConversationId, ProjectId},
    envelope::MessageEnvelope,
    protocol::NotificationFrame,
};
use tokio::sync::broadcast;

use crate::ConnectionState;

/// Everything the core fans out to UI surfaces: badge counters, the chat
/// window, toast/OS notification plumbing. Surfaces subscribe to the bus
/// instead of sharing component state.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    ConnectionStateChanged(ConnectionState),
    /// Full ordered message set for one conversation after a merge.
    ConversationUpdated {
        conversation_id: ConversationId,
        messages: Vec<MessageEnvelope>,
    },
    UnreadMapChanged(HashMap<ConversationId, u32>),
    UnreadTotalChanged(u32),
    ActiveConversationChanged(Option<ConversationId>),
    NotificationArrived(NotificationFrame),
    /// Result of the REST poll backstop for a project-level badge.
    ProjectUnreadFetched { project_id: ProjectId, count: u32 },
    Error(String),
}

/// Process-wide publish/subscribe bridge.
///
/// Publishing is synchronous fire-and-forget: subscribers registered at
/// publish time receive the event, later subscribers never do (no replay).
/// Dropping a receiver is the unsubscribe; the bus keeps no reference to
/// it afterwards, so repeated mount/unmount cycles cannot leak.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: SyncEvent) {
        // A send with no live receivers is not an error here.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
#[path = "tests/bus_tests.rs"]
mod tests;
