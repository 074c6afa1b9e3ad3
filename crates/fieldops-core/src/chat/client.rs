//! Chat client for the currently open conversation topic
//!
//! The `ChatClient` owns at most one open topic at a time: its realtime
//! subscription, the background pump that applies inbound messages, and the
//! reconciled [`Conversation`]. Sends are optimistic; the echo is visible
//! before the store answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ChatClient                                                     │
//! │  ├── active: Option<OpenTopic>                                  │
//! │  │   ├── view: ConversationView (shared Conversation)           │
//! │  │   ├── pump: JoinHandle (applies realtime inserts)            │
//! │  │   └── guard: SubscriptionGuard (upstream registration)       │
//! │  ├── open_seq: AtomicU64 (bumped by every open and close)       │
//! │  ├── status: TopicStatus                                        │
//! │  └── event_tx: broadcast::Sender<ChatEvent>                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::conversation::{Conversation, RemoteOutcome};
use super::events::{ChatEvent, TopicStatus};
use super::message::Message;
use crate::backend::{MessageStore, RealtimeTransport, SubscriptionGuard};
use crate::config::ChatConfig;
use crate::error::{CoreError, CoreResult};
use crate::session::SessionManager;
use crate::types::{now_millis, Identity, LocalId, TopicId};

/// Shared read view of an open conversation.
///
/// Stays valid after the topic is closed, but stops receiving updates.
#[derive(Clone)]
pub struct ConversationView {
    topic: TopicId,
    conversation: Arc<RwLock<Conversation>>,
}

impl ConversationView {
    pub fn topic(&self) -> &TopicId {
        &self.topic
    }

    /// Copy of the current message sequence
    pub fn messages(&self) -> Vec<Message> {
        self.conversation.read().messages().to_vec()
    }

    pub fn len(&self) -> usize {
        self.conversation.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversation.read().is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.conversation.read().unread_count()
    }

    /// Run a read-only closure against the conversation.
    pub fn with<R>(&self, f: impl FnOnce(&Conversation) -> R) -> R {
        f(&*self.conversation.read())
    }
}

impl std::fmt::Debug for ConversationView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationView")
            .field("topic", &self.topic)
            .field("len", &self.len())
            .finish()
    }
}

/// State for the open topic
struct OpenTopic {
    view: ConversationView,
    /// Handle to the background pump task
    pump: JoinHandle<()>,
    /// Releases the realtime registration when dropped
    guard: SubscriptionGuard,
}

impl OpenTopic {
    fn teardown(self) -> TopicId {
        // Abort before releasing so the pump never observes the closed stream.
        self.pump.abort();
        drop(self.guard);
        self.view.topic
    }
}

/// Client for one user's view of conversation topics.
///
/// # Example
///
/// ```ignore
/// let chat = ChatClient::for_session(&session, store, transport, ChatConfig::default())?;
/// let view = chat.open(TopicId::new("case-42")).await?;
///
/// chat.send("On my way").await?;
/// for message in view.messages() {
///     println!("{} [{}] {}", message.sender_id, message.delivery, message.body);
/// }
/// ```
pub struct ChatClient {
    self_id: Identity,
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn RealtimeTransport>,
    config: ChatConfig,
    active: Mutex<Option<OpenTopic>>,
    /// Stamp of the latest open or close; an open installs only if still current
    open_seq: AtomicU64,
    status: Arc<Mutex<TopicStatus>>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatClient {
    /// Create a client acting as `self_id`.
    pub fn new(
        self_id: Identity,
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn RealtimeTransport>,
        config: ChatConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            self_id,
            store,
            transport,
            config,
            active: Mutex::new(None),
            open_seq: AtomicU64::new(0),
            status: Arc::new(Mutex::new(TopicStatus::Closed)),
            event_tx,
        }
    }

    /// Create a client for the identity of an authenticated session.
    pub fn for_session(
        session: &SessionManager,
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn RealtimeTransport>,
        config: ChatConfig,
    ) -> CoreResult<Self> {
        let profile = session.require_profile()?;
        Ok(Self::new(profile.id, store, transport, config))
    }

    pub fn self_id(&self) -> &Identity {
        &self.self_id
    }

    /// Subscribe to chat events
    ///
    /// Multiple subscribers can exist; events are broadcast to all.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    pub fn status(&self) -> TopicStatus {
        self.status.lock().clone()
    }

    pub fn current_topic(&self) -> Option<TopicId> {
        self.active.lock().as_ref().map(|open| open.view.topic.clone())
    }

    /// View of the open conversation, if any
    pub fn view(&self) -> Option<ConversationView> {
        self.active.lock().as_ref().map(|open| open.view.clone())
    }

    /// Open a topic, closing whichever topic was open before.
    ///
    /// Subscribes before loading history so nothing committed in between is
    /// missed; the two sources are deduplicated by server id. If `close()` or
    /// another `open()` runs while history loads, this open is abandoned with
    /// `CoreError::Subscription` and its subscription released.
    pub async fn open(&self, topic: TopicId) -> CoreResult<ConversationView> {
        self.close();
        let stamp = self.open_seq.fetch_add(1, Ordering::AcqRel) + 1;

        info!(%topic, "Opening topic");
        let subscription = self.transport.subscribe_topic(&topic).map_err(|e| {
            warn!(%topic, error = %e, "Topic subscription failed");
            CoreError::Subscription(format!("cannot subscribe to {}: {}", topic, e))
        })?;

        // History failure drops the subscription with it.
        let history = self
            .store
            .list_messages(&topic, self.config.history_limit)
            .await?;

        let mut conversation = Conversation::new(topic.clone(), self.self_id.clone());
        let loaded = conversation.load_history(history);
        let view = ConversationView {
            topic: topic.clone(),
            conversation: Arc::new(RwLock::new(conversation)),
        };

        {
            let mut active = self.active.lock();
            if self.open_seq.load(Ordering::Acquire) != stamp {
                debug!(%topic, "Open superseded while loading history");
                return Err(CoreError::Subscription(format!(
                    "open of {} was superseded",
                    topic
                )));
            }
            debug!(%topic, loaded, "History loaded");

            *self.status.lock() = TopicStatus::Live(topic.clone());
            let (events, guard) = subscription.split();
            let pump = tokio::spawn(run_topic_pump(
                view.clone(),
                events,
                self.event_tx.clone(),
                self.status.clone(),
            ));

            if let Some(previous) = active.replace(OpenTopic {
                view: view.clone(),
                pump,
                guard,
            }) {
                let previous = previous.teardown();
                debug!(topic = %previous, "Replaced open topic");
            }
        }

        let _ = self.event_tx.send(ChatEvent::Opened {
            topic,
            message_count: view.len(),
        });
        Ok(view)
    }

    /// Close the open topic and release its subscription.
    ///
    /// Also abandons an `open()` still loading history. Returns false if no
    /// topic was installed.
    pub fn close(&self) -> bool {
        let open = {
            let mut active = self.active.lock();
            self.open_seq.fetch_add(1, Ordering::AcqRel);
            active.take()
        };
        let Some(open) = open else {
            return false;
        };
        let topic = open.teardown();
        info!(%topic, "Closed topic");
        *self.status.lock() = TopicStatus::Closed;
        let _ = self.event_tx.send(ChatEvent::Closed { topic });
        true
    }

    /// Send a message to the open topic.
    ///
    /// The pending echo is in the sequence before this awaits the store. On
    /// failure the echo is marked failed and the error carries its local id
    /// and body.
    pub async fn send(&self, body: impl Into<String>) -> CoreResult<Message> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(CoreError::InvalidOperation(
                "cannot send an empty message".to_string(),
            ));
        }
        let view = self.require_view()?;

        let local_id = LocalId::new();
        let len = {
            let mut conversation = view.conversation.write();
            conversation.push_pending(local_id, body.as_str());
            conversation.len()
        };
        debug!(topic = %view.topic, %local_id, "Pending echo added");
        self.emit_changed(&view.topic, len);

        self.deliver(&view, local_id, body).await
    }

    /// Resend a failed message under its original local id.
    pub async fn retry_send(&self, local_id: LocalId) -> CoreResult<Message> {
        let view = self.require_view()?;
        let body = view.conversation.write().retry(local_id).ok_or_else(|| {
            CoreError::InvalidOperation(format!("{} is not a failed message", local_id))
        })?;
        self.emit_changed(&view.topic, view.len());
        self.deliver(&view, local_id, body).await
    }

    /// Remove a failed message from the sequence.
    pub fn discard_failed(&self, local_id: LocalId) -> bool {
        let Some(view) = self.view() else {
            return false;
        };
        let removed = view.conversation.write().discard(local_id).is_some();
        if removed {
            self.emit_changed(&view.topic, view.len());
        }
        removed
    }

    /// Mark everything in the open topic as read.
    ///
    /// Updates the local sequence immediately; the store write runs in the
    /// background and its failure is only logged.
    pub fn mark_read(&self) -> usize {
        let Some(view) = self.view() else {
            return 0;
        };
        let marked = view.conversation.write().mark_read(now_millis());

        // Rows older than the loaded history may still be unread upstream.
        let store = self.store.clone();
        let topic = view.topic.clone();
        let reader = self.self_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.mark_read(&topic, &reader).await {
                warn!(%topic, error = %e, "Failed to persist read state");
            }
        });
        if marked > 0 {
            self.emit_changed(&view.topic, view.len());
        }
        marked
    }

    pub fn unread_count(&self) -> usize {
        self.view().map(|view| view.unread_count()).unwrap_or(0)
    }

    fn require_view(&self) -> CoreResult<ConversationView> {
        self.view()
            .ok_or_else(|| CoreError::InvalidOperation("no topic is open".to_string()))
    }

    fn emit_changed(&self, topic: &TopicId, len: usize) {
        let _ = self.event_tx.send(ChatEvent::MessagesChanged {
            topic: topic.clone(),
            len,
        });
    }

    async fn deliver(
        &self,
        view: &ConversationView,
        local_id: LocalId,
        body: String,
    ) -> CoreResult<Message> {
        match self
            .store
            .create_message(&view.topic, &self.self_id, &body)
            .await
        {
            Ok(confirmed) => {
                let (message, len) = {
                    let mut conversation = view.conversation.write();
                    conversation.confirm(local_id, confirmed.clone());
                    let message = conversation
                        .get_by_local(local_id)
                        .cloned()
                        .unwrap_or(confirmed);
                    (message, conversation.len())
                };
                debug!(topic = %view.topic, %local_id, id = ?message.id, "Send confirmed");
                self.emit_changed(&view.topic, len);
                Ok(message)
            }
            Err(e) => {
                warn!(topic = %view.topic, %local_id, error = %e, "Send failed");
                view.conversation.write().fail(local_id);
                let reason = e.to_string();
                let _ = self.event_tx.send(ChatEvent::SendFailed {
                    topic: view.topic.clone(),
                    local_id,
                    reason: reason.clone(),
                });
                Err(CoreError::SendFailure {
                    local_id,
                    body,
                    reason,
                })
            }
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(open) = self.active.get_mut().take() {
            open.teardown();
        }
    }
}

/// Background task applying realtime inserts for one topic
async fn run_topic_pump(
    view: ConversationView,
    mut events: mpsc::UnboundedReceiver<Message>,
    event_tx: broadcast::Sender<ChatEvent>,
    status: Arc<Mutex<TopicStatus>>,
) {
    debug!(topic = %view.topic, "Topic pump started");

    while let Some(message) = events.recv().await {
        let (outcome, len) = {
            let mut conversation = view.conversation.write();
            let outcome = conversation.apply_remote(message);
            (outcome, conversation.len())
        };
        if outcome == RemoteOutcome::Appended {
            let _ = event_tx.send(ChatEvent::MessagesChanged {
                topic: view.topic.clone(),
                len,
            });
        }
    }

    warn!(topic = %view.topic, "Realtime subscription closed");
    {
        let mut status = status.lock();
        if status.topic() == Some(&view.topic) {
            *status = TopicStatus::Lost(view.topic.clone());
        }
    }
    let _ = event_tx.send(ChatEvent::SubscriptionLost {
        topic: view.topic.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryPlatform;

    fn client(platform: &MemoryPlatform) -> ChatClient {
        ChatClient::new(
            Identity::new("me"),
            Arc::new(platform.clone()),
            Arc::new(platform.clone()),
            ChatConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_client_starts_closed() {
        let platform = MemoryPlatform::new();
        let chat = client(&platform);
        assert_eq!(chat.status(), TopicStatus::Closed);
        assert!(chat.current_topic().is_none());
        assert_eq!(chat.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_send_without_open_topic_fails() {
        let platform = MemoryPlatform::new();
        let chat = client(&platform);
        let err = chat.send("hello").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation(_)));
        assert!(platform.stored_messages(&TopicId::new("t")).is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let platform = MemoryPlatform::new();
        let chat = client(&platform);
        chat.open(TopicId::new("t")).await.unwrap();
        let err = chat.send("   ").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation(_)));
        assert!(chat.view().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_loads_history() {
        let platform = MemoryPlatform::new();
        let topic = TopicId::new("t");
        platform.inject_message(&topic, &Identity::new("them"), "one");
        platform.inject_message(&topic, &Identity::new("them"), "two");

        let chat = client(&platform);
        let view = chat.open(topic.clone()).await.unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view.unread_count(), 2);
        assert_eq!(chat.status(), TopicStatus::Live(topic));
    }

    #[tokio::test]
    async fn test_close_releases_subscription() {
        let platform = MemoryPlatform::new();
        let topic = TopicId::new("t");
        let chat = client(&platform);

        chat.open(topic.clone()).await.unwrap();
        assert_eq!(platform.active_topic_subscriptions(&topic), 1);

        assert!(chat.close());
        assert_eq!(platform.active_topic_subscriptions(&topic), 0);
        assert!(!chat.close());
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let platform = MemoryPlatform::new();
        let topic = TopicId::new("t");
        let chat = client(&platform);
        chat.open(topic.clone()).await.unwrap();

        drop(chat);
        assert_eq!(platform.total_topic_subscriptions(), 0);
    }
}
