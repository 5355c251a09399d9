use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ConversationId, NotificationChannel, ProjectId, UserId},
    envelope::MessageEnvelope,
    error::ApiError,
    protocol::{ChatFrame, ClientFrame, NotificationFrame, ServerFrame},
};
use storage::SessionStore;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

pub mod bus;
pub mod config;
pub mod notify;
pub mod reconcile;
pub mod unread;

pub use bus::{EventBus, SyncEvent};
pub use config::{load_config, SyncConfig};
pub use notify::{MissingNotificationSink, NotificationRequest, NotificationSink};
pub use unread::UnreadLedger;

const OUTBOUND_QUEUE_DEPTH: usize = 64;
const FALLBACK_CONVERSATION_NAME: &str = "Group Chat";

/// Lifecycle of the per-session socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Backoff schedule for reconnects: `initial * 2^(attempt-1)`, capped at
/// `max_backoff`, exhausted once the attempt budget is spent.
pub(crate) fn reconnect_delay(attempt: u32, config: &SyncConfig) -> Option<Duration> {
    if attempt == 0 || attempt > config.max_reconnect_attempts {
        return None;
    }
    let exponent = attempt.saturating_sub(1).min(31);
    let delay = config
        .initial_backoff
        .saturating_mul(2u32.saturating_pow(exponent));
    Some(delay.min(config.max_backoff))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageHttpRequest {
    conversation_id: ConversationId,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCountResponse {
    unread_count: u32,
}

/// Failures of the HTTP send fallback. None of these reach the caller of
/// [`ChatClient::send`]; the variants exist so the log line can tell a
/// rejected request from a dead transport.
#[derive(Debug, Error)]
enum FallbackError {
    #[error("rejected: {0}")]
    Rejected(ApiError),
    #[error("rejected with status {0}")]
    RejectedStatus(reqwest::StatusCode),
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The synchronization core: one socket per session, reconciled message
/// sets per conversation, the unread ledger, and the event bus the UI
/// surfaces hang off.
pub struct ChatClient {
    http: Client,
    config: SyncConfig,
    user_id: UserId,
    auth_token: String,
    ledger: Arc<UnreadLedger>,
    notifier: Arc<dyn NotificationSink>,
    bus: EventBus,
    local_id_counter: AtomicU64,
    inner: Mutex<ClientState>,
}

struct ClientState {
    connection_state: ConnectionState,
    retry_count: u32,
    subscribed_conversations: Vec<ConversationId>,
    outbound: Option<mpsc::Sender<ClientFrame>>,
    supervisor: Option<JoinHandle<()>>,
    poll_tasks: Vec<JoinHandle<()>>,
    conversations: HashMap<ConversationId, Vec<MessageEnvelope>>,
    conversation_directory: HashMap<ConversationId, String>,
}

impl ChatClient {
    pub async fn new(
        config: SyncConfig,
        user_id: UserId,
        auth_token: impl Into<String>,
    ) -> Result<Arc<Self>> {
        Self::new_with_sink(config, user_id, auth_token, Arc::new(MissingNotificationSink)).await
    }

    pub async fn new_with_sink(
        config: SyncConfig,
        user_id: UserId,
        auth_token: impl Into<String>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Arc<Self>> {
        let bus = EventBus::default();
        let store = SessionStore::new(&config.database_url).await?;
        let ledger = Arc::new(UnreadLedger::open(store, bus.clone()).await?);
        Ok(Arc::new(Self {
            http: Client::new(),
            config,
            user_id,
            auth_token: auth_token.into(),
            ledger,
            notifier,
            bus,
            local_id_counter: AtomicU64::new(1),
            inner: Mutex::new(ClientState {
                connection_state: ConnectionState::Idle,
                retry_count: 0,
                subscribed_conversations: Vec::new(),
                outbound: None,
                supervisor: None,
                poll_tasks: Vec::new(),
                conversations: HashMap::new(),
                conversation_directory: HashMap::new(),
            }),
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }

    pub fn ledger(&self) -> Arc<UnreadLedger> {
        Arc::clone(&self.ledger)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection_state
    }

    /// Opens the socket and starts the supervision loop. A missing auth
    /// token makes this a no-op: anonymous connections are never
    /// attempted. Calling again while supervision is running is ignored.
    pub async fn connect(self: &Arc<Self>, conversation_ids: Vec<ConversationId>) {
        if self.auth_token.is_empty() {
            warn!("chat: no auth token, skipping connection");
            return;
        }
        let mut guard = self.inner.lock().await;
        if guard
            .supervisor
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            warn!("chat: connection supervision already running");
            return;
        }
        guard.subscribed_conversations = conversation_ids;
        let client = Arc::clone(self);
        guard.supervisor = Some(tokio::spawn(async move {
            client.run_connection().await;
        }));
    }

    /// Cancels supervision (including any pending reconnect timer) and the
    /// pollers, closing the socket. Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(supervisor) = guard.supervisor.take() {
            supervisor.abort();
        }
        for task in guard.poll_tasks.drain(..) {
            task.abort();
        }
        // Dropping the sender stops the writer task, which closes the
        // socket from our side.
        guard.outbound = None;
        guard.connection_state = ConnectionState::Idle;
        drop(guard);
        self.bus
            .publish(SyncEvent::ConnectionStateChanged(ConnectionState::Idle));
    }

    /// Navigation hook: marks the viewed conversation and clears its
    /// unread counter.
    pub async fn set_active_conversation(&self, conversation_id: Option<ConversationId>) {
        self.ledger.set_active(conversation_id).await;
    }

    /// Directory of conversation names, used for notification titles.
    pub async fn set_conversations(&self, conversations: Vec<(ConversationId, String)>) {
        let mut guard = self.inner.lock().await;
        guard.conversation_directory = conversations.into_iter().collect();
    }

    pub async fn conversation_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Vec<MessageEnvelope> {
        self.inner
            .lock()
            .await
            .conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Fire-and-forget when the socket is open; otherwise the HTTP
    /// fallback posts the message and, on success only, synthesizes an
    /// optimistic local envelope so the UI shows it without waiting for
    /// the echo. Never surfaces a transport error to the caller.
    pub async fn send(&self, conversation_id: ConversationId, body: impl Into<String>) {
        let body = body.into();
        let outbound = { self.inner.lock().await.outbound.clone() };
        if let Some(outbound) = outbound {
            let frame = ClientFrame::Message {
                conversation_id: conversation_id.clone(),
                message: body.clone(),
            };
            if outbound.send(frame).await.is_ok() {
                return;
            }
            warn!(
                conversation_id = %conversation_id,
                "chat: socket writer gone, using http fallback"
            );
        }
        self.send_via_http(conversation_id, body).await;
    }

    async fn send_via_http(&self, conversation_id: ConversationId, body: String) {
        match self.post_send_fallback(&conversation_id, &body).await {
            Ok(()) => {
                let token = self.local_id_counter.fetch_add(1, Ordering::Relaxed);
                let envelope = MessageEnvelope::local(
                    conversation_id.clone(),
                    self.user_id.clone(),
                    body,
                    chrono::Utc::now(),
                    token,
                );
                let messages = {
                    let mut guard = self.inner.lock().await;
                    let known = guard.conversations.entry(conversation_id.clone()).or_default();
                    reconcile::merge_inbound(known, envelope);
                    known.clone()
                };
                self.bus.publish(SyncEvent::ConversationUpdated {
                    conversation_id,
                    messages,
                });
            }
            Err(err) => {
                // No optimistic envelope on failure: the UI must not show
                // a success state for a message the server never took.
                error!(conversation_id = %conversation_id, "chat: http fallback failed: {err}");
                self.bus
                    .publish(SyncEvent::Error(format!("message send failed: {err}")));
            }
        }
    }

    async fn post_send_fallback(
        &self,
        conversation_id: &ConversationId,
        body: &str,
    ) -> std::result::Result<(), FallbackError> {
        let response = self
            .http
            .post(format!("{}/api/chat/messages", self.config.api_base))
            .bearer_auth(&self.auth_token)
            .json(&SendMessageHttpRequest {
                conversation_id: conversation_id.clone(),
                message: body.to_string(),
            })
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        match response.json::<ApiError>().await {
            Ok(api_error) => Err(FallbackError::Rejected(api_error)),
            Err(_) => Err(FallbackError::RejectedStatus(status)),
        }
    }

    /// Loads the authoritative history for a conversation and merges it
    /// under whatever optimistic and live envelopes arrived first.
    pub async fn load_history(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessageEnvelope>> {
        let frames: Vec<ChatFrame> = self
            .http
            .get(format!("{}/api/chat/messages", self.config.api_base))
            .query(&[("conversationId", conversation_id.as_str())])
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let history: Vec<MessageEnvelope> =
            frames.into_iter().map(MessageEnvelope::from_frame).collect();

        let messages = {
            let mut guard = self.inner.lock().await;
            let existing = guard
                .conversations
                .remove(&conversation_id)
                .unwrap_or_default();
            let (local, live): (Vec<_>, Vec<_>) =
                existing.into_iter().partition(MessageEnvelope::is_local);
            let merged = reconcile::merge_sources(&history, &local, &live);
            guard
                .conversations
                .insert(conversation_id.clone(), merged.clone());
            merged
        };
        self.bus.publish(SyncEvent::ConversationUpdated {
            conversation_id,
            messages: messages.clone(),
        });
        Ok(messages)
    }

    /// Correctness backstop for project-level badges: the socket path is
    /// best-effort, this fixed-interval REST poll is the durability
    /// fallback. Poll errors are logged and the tick skipped.
    pub async fn spawn_unread_poll(self: &Arc<Self>, project_id: ProjectId) {
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.config.unread_poll_interval);
            loop {
                ticker.tick().await;
                match client.fetch_project_unread(&project_id).await {
                    Ok(count) => client.bus.publish(SyncEvent::ProjectUnreadFetched {
                        project_id: project_id.clone(),
                        count,
                    }),
                    Err(err) => {
                        warn!(project_id = %project_id, "chat: unread poll failed: {err:#}");
                    }
                }
            }
        });
        self.inner.lock().await.poll_tasks.push(handle);
    }

    async fn fetch_project_unread(&self, project_id: &ProjectId) -> Result<u32> {
        let response: UnreadCountResponse = self
            .http
            .get(format!(
                "{}/api/projects/{}/messages/unread-count",
                self.config.api_base, project_id
            ))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid unread-count payload")?;
        Ok(response.unread_count)
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        {
            let mut guard = self.inner.lock().await;
            guard.connection_state = state;
        }
        self.bus.publish(SyncEvent::ConnectionStateChanged(state));
    }

    /// Supervision loop: connect, pump frames until the socket dies, then
    /// back off and try again. Exactly one reconnect is scheduled per
    /// close; the budget resets whenever a connection reaches Open.
    async fn run_connection(self: Arc<Self>) {
        loop {
            self.set_connection_state(ConnectionState::Connecting).await;
            if let Err(err) = self.connect_once().await {
                warn!("chat: connection attempt failed: {err:#}");
            }
            let attempt = {
                let mut guard = self.inner.lock().await;
                guard.outbound = None;
                guard.retry_count += 1;
                guard.retry_count
            };
            self.set_connection_state(ConnectionState::Closed).await;
            let Some(delay) = reconnect_delay(attempt, &self.config) else {
                warn!(attempts = attempt - 1, "chat: reconnect budget exhausted, giving up");
                break;
            };
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "chat: reconnect scheduled"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection lifetime: handshake, authenticate, pump frames.
    /// Returns once the socket closes for any reason.
    async fn connect_once(self: &Arc<Self>) -> Result<()> {
        let ws_url = self.config.websocket_url()?;
        let (stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (mut ws_writer, mut ws_reader) = stream.split();

        // The socket is open: register the outbound queue before the
        // handshake frame goes out so a send racing the Open event uses
        // the socket rather than the fallback.
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientFrame>(OUTBOUND_QUEUE_DEPTH);
        let subscribed = {
            let mut guard = self.inner.lock().await;
            guard.outbound = Some(outbound_tx);
            guard.retry_count = 0;
            guard.connection_state = ConnectionState::Open;
            guard.subscribed_conversations.clone()
        };
        self.bus
            .publish(SyncEvent::ConnectionStateChanged(ConnectionState::Open));

        let auth_frame = serde_json::to_string(&ClientFrame::Authenticate {
            token: self.auth_token.clone(),
            conversation_ids: subscribed,
        })?;
        ws_writer
            .send(Message::Text(auth_frame))
            .await
            .context("failed to send authentication frame")?;
        info!(url = %ws_url, "chat: connected and authenticated");

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        error!("chat: failed to serialize outbound frame: {err}");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(message) = ws_reader.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_frame(&text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("chat: websocket receive failed: {err}");
                    break;
                }
            }
        }

        writer_task.abort();
        Ok(())
    }

    /// Classifies one raw frame. Malformed or unrecognized frames are
    /// logged and dropped, never propagated.
    async fn handle_frame(&self, raw: &str) {
        let frame: ServerFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("chat: dropping unrecognized frame: {err}");
                return;
            }
        };
        match frame {
            ServerFrame::Message(chat) => self.handle_chat_frame(chat).await,
            ServerFrame::Notification(notification) => {
                self.handle_notification_frame(notification).await;
            }
        }
    }

    async fn handle_chat_frame(&self, frame: ChatFrame) {
        let envelope = MessageEnvelope::from_frame(frame);
        let conversation_id = envelope.conversation_id.clone();
        let is_from_self = envelope.sender_id == self.user_id;
        let preview = envelope.body.clone();

        let messages = {
            let mut guard = self.inner.lock().await;
            let known = guard.conversations.entry(conversation_id.clone()).or_default();
            reconcile::merge_inbound(known, envelope);
            known.clone()
        };
        self.bus.publish(SyncEvent::ConversationUpdated {
            conversation_id: conversation_id.clone(),
            messages,
        });

        let is_active = self.ledger.active().await.as_ref() == Some(&conversation_id);
        self.ledger
            .record_inbound(&conversation_id, is_from_self)
            .await;
        if !is_from_self && !is_active {
            self.dispatch_chat_notification(&conversation_id, &preview)
                .await;
        }
    }

    async fn handle_notification_frame(&self, frame: NotificationFrame) {
        self.bus
            .publish(SyncEvent::NotificationArrived(frame.clone()));

        match frame.channel {
            NotificationChannel::Chat => {
                let Some(conversation_id) = frame.conversation_id.clone() else {
                    return;
                };
                let is_from_self = frame.from.as_ref() == Some(&self.user_id);
                let is_active = self.ledger.active().await.as_ref() == Some(&conversation_id);
                self.ledger
                    .record_inbound(&conversation_id, is_from_self)
                    .await;
                if !is_from_self && !is_active {
                    self.dispatch_chat_notification(&conversation_id, frame.preview())
                        .await;
                }
            }
            NotificationChannel::Task => {
                if self.notifier.is_enabled() {
                    self.notifier.show(NotificationRequest::for_task(&frame)).await;
                }
            }
            _ => {}
        }
    }

    async fn dispatch_chat_notification(&self, conversation_id: &ConversationId, preview: &str) {
        if !self.notifier.is_enabled() {
            return;
        }
        let conversation_name = {
            let guard = self.inner.lock().await;
            guard
                .conversation_directory
                .get(conversation_id)
                .cloned()
                .unwrap_or_else(|| FALLBACK_CONVERSATION_NAME.to_string())
        };
        self.notifier
            .show(NotificationRequest::for_chat_message(
                conversation_id,
                &conversation_name,
                preview,
            ))
            .await;
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
