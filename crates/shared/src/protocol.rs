use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConversationId, NotificationChannel, TaskId, UserId};

/// Frames the client writes to the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Sent exactly once per connection, immediately after the socket
    /// opens. `conversation_ids` scopes server-side delivery.
    #[serde(rename_all = "camelCase")]
    Authenticate {
        token: String,
        conversation_ids: Vec<ConversationId>,
    },
    #[serde(rename_all = "camelCase")]
    Message {
        conversation_id: ConversationId,
        message: String,
    },
}

/// Inbound chat frame. The server emits both `message` and
/// `private_message` tags and is inconsistent about field names
/// (`senderId` vs `from`, `message` vs `text`); all spellings land here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    pub conversation_id: ConversationId,
    #[serde(alias = "from")]
    pub sender_id: UserId,
    #[serde(alias = "text")]
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Inbound notification frame. Everything past `channel` is free-form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFrame {
    pub channel: NotificationChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl NotificationFrame {
    /// Preferred human-readable text, in the order the server populates it.
    pub fn preview(&self) -> &str {
        self.message
            .as_deref()
            .or(self.body.as_deref())
            .unwrap_or_default()
    }
}

/// Frames the server pushes over the socket. Unlisted `type` tags fail to
/// parse; the connection layer drops those frames rather than erroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(alias = "private_message")]
    Message(ChatFrame),
    Notification(NotificationFrame),
}
