use async_trait::async_trait;
use shared::{
    domain::{ConversationId, TaskId},
    protocol::NotificationFrame,
};

/// Normalized request handed to the OS-level notification surface.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    /// Collapse key: one visible notification per conversation or task.
    pub tag: String,
    pub conversation_id: Option<ConversationId>,
    pub task_id: Option<TaskId>,
}

impl NotificationRequest {
    /// For an inbound chat message in a non-active conversation.
    pub fn for_chat_message(
        conversation_id: &ConversationId,
        conversation_name: &str,
        preview: &str,
    ) -> Self {
        Self {
            title: format!("New message in {conversation_name}"),
            body: preview.chars().take(100).collect(),
            tag: format!("chat-{conversation_id}"),
            conversation_id: Some(conversation_id.clone()),
            task_id: None,
        }
    }

    /// For a task-channel notification frame.
    pub fn for_task(frame: &NotificationFrame) -> Self {
        let tag = match &frame.task_id {
            Some(task_id) => format!("task-{task_id}"),
            None => "task".into(),
        };
        Self {
            title: frame.title.clone().unwrap_or_else(|| "New Task".into()),
            body: frame.preview().to_string(),
            tag,
            conversation_id: None,
            task_id: frame.task_id.clone(),
        }
    }
}

/// External collaborator that renders OS-level notifications. The core
/// only consults the permission gate and hands over normalized requests;
/// presentation (sound, vibration, click routing) is the shell's problem.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Whether the user has granted OS-level notification permission.
    /// When false the core degrades to in-app bus events only, with no
    /// re-prompt loop.
    fn is_enabled(&self) -> bool;

    async fn show(&self, request: NotificationRequest);
}

/// Default sink for shells without a notification surface.
pub struct MissingNotificationSink;

#[async_trait]
impl NotificationSink for MissingNotificationSink {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn show(&self, _request: NotificationRequest) {}
}
