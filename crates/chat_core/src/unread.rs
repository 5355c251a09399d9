use std::collections::HashMap;

use anyhow::Result;
use shared::domain::ConversationId;
use storage::SessionStore;
use tokio::sync::Mutex;
use tracing::warn;

use crate::bus::{EventBus, SyncEvent};

/// Per-conversation unread counters and the active-conversation marker
/// that gates them. One instance per session; every surface reads through
/// bus events rather than polling this container.
pub struct UnreadLedger {
    inner: Mutex<LedgerState>,
    store: SessionStore,
    bus: EventBus,
}

struct LedgerState {
    counts: HashMap<ConversationId, u32>,
    active_conversation: Option<ConversationId>,
}

impl UnreadLedger {
    /// Loads the persisted map, reconciling it with its stored total, so
    /// the in-memory and persisted copies start in lockstep.
    pub async fn open(store: SessionStore, bus: EventBus) -> Result<Self> {
        let counts = store.load_unread().await?;
        Ok(Self {
            inner: Mutex::new(LedgerState {
                counts,
                active_conversation: None,
            }),
            store,
            bus,
        })
    }

    /// Counts one inbound envelope. Increments by exactly 1 unless the
    /// message is the user's own or belongs to the active conversation.
    pub async fn record_inbound(&self, conversation_id: &ConversationId, is_from_self: bool) {
        if is_from_self {
            return;
        }
        let counts = {
            let mut guard = self.inner.lock().await;
            if guard.active_conversation.as_ref() == Some(conversation_id) {
                return;
            }
            *guard.counts.entry(conversation_id.clone()).or_insert(0) += 1;
            guard.counts.clone()
        };
        self.commit(counts).await;
    }

    /// Drops the counter for a conversation the user navigated to.
    pub async fn clear(&self, conversation_id: &ConversationId) {
        let counts = {
            let mut guard = self.inner.lock().await;
            if guard.counts.remove(conversation_id).is_none() {
                return;
            }
            guard.counts.clone()
        };
        self.commit(counts).await;
    }

    /// Always the sum over the map; never tracked separately, so it
    /// cannot drift.
    pub async fn total(&self) -> u32 {
        self.inner.lock().await.counts.values().sum()
    }

    pub async fn counts(&self) -> HashMap<ConversationId, u32> {
        self.inner.lock().await.counts.clone()
    }

    pub async fn active(&self) -> Option<ConversationId> {
        self.inner.lock().await.active_conversation.clone()
    }

    /// Navigation: marks the conversation active (or none) and clears its
    /// counter, broadcasting both changes.
    pub async fn set_active(&self, conversation_id: Option<ConversationId>) {
        {
            let mut guard = self.inner.lock().await;
            guard.active_conversation = conversation_id.clone();
        }
        self.bus
            .publish(SyncEvent::ActiveConversationChanged(conversation_id.clone()));
        if let Some(conversation_id) = conversation_id {
            self.clear(&conversation_id).await;
        }
    }

    /// Persists the full map, then broadcasts it with its total. Storage
    /// failure is logged and absorbed; the broadcast still goes out so the
    /// UI stays current with memory.
    async fn commit(&self, counts: HashMap<ConversationId, u32>) {
        let total: u32 = counts.values().sum();
        if let Err(err) = self.store.persist_unread(&counts).await {
            warn!("unread: persist failed: {err:#}");
        }
        self.bus.publish(SyncEvent::UnreadMapChanged(counts));
        self.bus.publish(SyncEvent::UnreadTotalChanged(total));
    }
}

#[cfg(test)]
#[path = "tests/unread_tests.rs"]
mod tests;
