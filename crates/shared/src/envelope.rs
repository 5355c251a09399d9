use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConversationId, UserId},
    protocol::ChatFrame,
};

/// Prefix on the placeholder id of an optimistic local message.
pub const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Chat,
    Notification,
}

/// One logical unit on the connection: a chat message or a notification.
///
/// `client_local_id` is present only while a message awaits its server
/// echo; reconciliation removes the placeholder when the echo arrives, so
/// a confirmed message is never duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub kind: EnvelopeKind,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_local_id: Option<String>,
}

impl MessageEnvelope {
    /// Server-confirmed envelope from an inbound chat frame.
    pub fn from_frame(frame: ChatFrame) -> Self {
        Self {
            kind: EnvelopeKind::Chat,
            conversation_id: frame.conversation_id,
            sender_id: frame.sender_id,
            body: frame.message,
            timestamp: frame.timestamp,
            client_local_id: None,
        }
    }

    /// Optimistic envelope for a message sent through the HTTP fallback,
    /// shown in the UI before the server echoes it back.
    pub fn local(
        conversation_id: ConversationId,
        sender_id: UserId,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
        token: u64,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Chat,
            conversation_id,
            sender_id,
            body: body.into(),
            timestamp,
            client_local_id: Some(format!("{LOCAL_ID_PREFIX}{token}")),
        }
    }

    pub fn is_local(&self) -> bool {
        self.client_local_id
            .as_deref()
            .is_some_and(|id| id.starts_with(LOCAL_ID_PREFIX))
    }
}
