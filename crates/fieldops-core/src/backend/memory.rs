//! In-memory platform backend
//!
//! [`MemoryPlatform`] implements every backend contract against process-local
//! state. Behaviour can be scripted (failing sign-ins, slow or hanging profile
//! fetches, failing message writes, redelivered events) and the platform keeps
//! counters the test suites assert on. The CLI scenarios run on it as well.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    IdentityChange, IdentityProvider, InterruptTransport, MessageStore, ProfileStore,
    RealtimeTransport, RecoveryNavigator, Subscription,
};
use crate::chat::Message;
use crate::error::{CoreError, CoreResult, CredentialError};
use crate::interrupt::{InterruptEvent, InterruptId};
use crate::types::{now_millis, Credentials, Identity, MessageId, Profile, TopicId};

/// Scripted outcome of one profile fetch
#[derive(Debug, Clone)]
pub enum FetchBehavior {
    /// Look the profile up after `latency`
    Respond { latency: Duration },
    /// Never resolve
    Hang,
    /// Fail with a transient store error after `latency`
    Unavailable { latency: Duration },
}

struct Account {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct PlatformState {
    accounts: HashMap<String, Account>,
    sign_in_errors: VecDeque<CredentialError>,
    current: Option<Identity>,
    identity_listeners: HashMap<u64, mpsc::UnboundedSender<IdentityChange>>,
    listener_registrations: usize,
    sign_out_calls: usize,
    sign_out_delay: Duration,
    probe_delay: Duration,
    fail_sign_out: bool,

    profiles: HashMap<Identity, Profile>,
    fetch_script: VecDeque<FetchBehavior>,
    profile_fetch_calls: usize,

    messages: HashMap<TopicId, Vec<Message>>,
    next_message_seq: u64,
    failing_writes: usize,
    write_delay: Duration,
    mark_read_calls: Vec<(TopicId, Identity)>,
    topic_listeners: HashMap<TopicId, HashMap<u64, mpsc::UnboundedSender<Message>>>,

    interrupt_listeners: HashMap<u64, mpsc::UnboundedSender<InterruptEvent>>,

    next_subscription_id: u64,
}

impl PlatformState {
    fn next_subscription_id(&mut self) -> u64 {
        self.next_subscription_id += 1;
        self.next_subscription_id
    }

    fn notify_identity(&mut self, change: IdentityChange) {
        self.identity_listeners
            .retain(|_, tx| tx.send(change.clone()).is_ok());
    }

    fn deliver_topic(&mut self, message: &Message) {
        if let Some(listeners) = self.topic_listeners.get_mut(&message.topic) {
            listeners.retain(|_, tx| tx.send(message.clone()).is_ok());
        }
    }

    fn commit_message(&mut self, topic: &TopicId, sender: &Identity, body: &str) -> Message {
        self.next_message_seq += 1;
        let message = Message::confirmed(
            MessageId::new(format!("msg-{}", self.next_message_seq)),
            topic.clone(),
            sender.clone(),
            body,
            now_millis(),
        );
        self.messages
            .entry(topic.clone())
            .or_default()
            .push(message.clone());
        self.deliver_topic(&message);
        message
    }
}

/// Process-local stand-in for the hosted data-and-auth platform.
///
/// Cloning shares the same state.
#[derive(Clone, Default)]
pub struct MemoryPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Identity scripting
    // ------------------------------------------------------------------

    /// Register an account and its profile row
    pub fn add_account(&self, email: &str, password: &str, profile: Profile) {
        let mut state = self.state.lock();
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                identity: profile.id.clone(),
            },
        );
        state.profiles.insert(profile.id.clone(), profile);
    }

    /// Register an account whose profile row is missing
    pub fn add_account_without_profile(&self, email: &str, password: &str, identity: Identity) {
        self.state.lock().accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                identity,
            },
        );
    }

    /// Make the next sign-in fail with `error` regardless of credentials
    pub fn fail_next_sign_in(&self, error: CredentialError) {
        self.state.lock().sign_in_errors.push_back(error);
    }

    /// Pretend a credential from a previous run is still stored
    pub fn restore_session(&self, identity: Identity) {
        self.state.lock().current = Some(identity);
    }

    /// Delay the answer of `current_session`; the answer is taken before the delay
    pub fn set_session_probe_delay(&self, delay: Duration) {
        self.state.lock().probe_delay = delay;
    }

    pub fn set_sign_out_delay(&self, delay: Duration) {
        self.state.lock().sign_out_delay = delay;
    }

    pub fn set_sign_out_fails(&self, fails: bool) {
        self.state.lock().fail_sign_out = fails;
    }

    /// Push an identity-change notification to every registered listener
    pub fn emit_identity_change(&self, change: IdentityChange) {
        self.state.lock().notify_identity(change);
    }

    pub fn listener_registrations(&self) -> usize {
        self.state.lock().listener_registrations
    }

    pub fn active_identity_listeners(&self) -> usize {
        self.state.lock().identity_listeners.len()
    }

    pub fn sign_out_calls(&self) -> usize {
        self.state.lock().sign_out_calls
    }

    // ------------------------------------------------------------------
    // Profile scripting
    // ------------------------------------------------------------------

    /// Queue behaviours for upcoming profile fetches; an empty queue responds immediately
    pub fn script_profile_fetches(&self, script: impl IntoIterator<Item = FetchBehavior>) {
        self.state.lock().fetch_script.extend(script);
    }

    pub fn profile_fetch_calls(&self) -> usize {
        self.state.lock().profile_fetch_calls
    }

    // ------------------------------------------------------------------
    // Message scripting
    // ------------------------------------------------------------------

    /// Fail the next `count` message writes
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().failing_writes += count;
    }

    /// Delay between a write's commit and its acknowledgement to the caller
    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().write_delay = delay;
    }

    /// Commit a message from another participant and push it to subscribers
    pub fn inject_message(&self, topic: &TopicId, sender: &Identity, body: &str) -> Message {
        self.state.lock().commit_message(topic, sender, body)
    }

    /// Push an already committed message again (at-least-once delivery)
    pub fn redeliver(&self, message: &Message) {
        self.state.lock().deliver_topic(message);
    }

    /// Drop every subscriber sender for `topic`, ending their streams
    pub fn close_topic_streams(&self, topic: &TopicId) {
        self.state.lock().topic_listeners.remove(topic);
    }

    pub fn stored_messages(&self, topic: &TopicId) -> Vec<Message> {
        self.state
            .lock()
            .messages
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn active_topic_subscriptions(&self, topic: &TopicId) -> usize {
        self.state
            .lock()
            .topic_listeners
            .get(topic)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    pub fn total_topic_subscriptions(&self) -> usize {
        self.state
            .lock()
            .topic_listeners
            .values()
            .map(|l| l.len())
            .sum()
    }

    pub fn mark_read_calls(&self) -> Vec<(TopicId, Identity)> {
        self.state.lock().mark_read_calls.clone()
    }

    // ------------------------------------------------------------------
    // Interrupt scripting
    // ------------------------------------------------------------------

    /// Push an interrupt to every interrupt subscriber
    pub fn broadcast_interrupt(&self, event: InterruptEvent) {
        self.state
            .lock()
            .interrupt_listeners
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn active_interrupt_subscriptions(&self) -> usize {
        self.state.lock().interrupt_listeners.len()
    }
}

#[async_trait]
impl IdentityProvider for MemoryPlatform {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, CredentialError> {
        let mut state = self.state.lock();
        if let Some(error) = state.sign_in_errors.pop_front() {
            return Err(error);
        }

        let identity = match state.accounts.get(&credentials.email) {
            Some(account) if account.password == credentials.password => {
                account.identity.clone()
            }
            _ => return Err(CredentialError::InvalidCredentials),
        };

        debug!(%identity, "memory platform: signed in");
        state.current = Some(identity.clone());
        state.notify_identity(IdentityChange::signed_in(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> CoreResult<()> {
        let (delay, fails) = {
            let mut state = self.state.lock();
            state.sign_out_calls += 1;
            (state.sign_out_delay, state.fail_sign_out)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(CoreError::Backend("sign-out request failed".to_string()));
        }

        let mut state = self.state.lock();
        state.current = None;
        state.notify_identity(IdentityChange::signed_out());
        Ok(())
    }

    async fn current_session(&self) -> CoreResult<Option<Identity>> {
        let (current, delay) = {
            let state = self.state.lock();
            (state.current.clone(), state.probe_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(current)
    }

    fn on_identity_change(&self) -> Subscription<IdentityChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            state.listener_registrations += 1;
            let id = state.next_subscription_id();
            state.identity_listeners.insert(id, tx);
            id
        };

        let state = self.state.clone();
        Subscription::new(rx, move || {
            state.lock().identity_listeners.remove(&id);
        })
    }
}

#[async_trait]
impl ProfileStore for MemoryPlatform {
    async fn fetch_profile(&self, identity: &Identity) -> CoreResult<Profile> {
        let behavior = {
            let mut state = self.state.lock();
            state.profile_fetch_calls += 1;
            state.fetch_script.pop_front()
        };

        match behavior {
            Some(FetchBehavior::Hang) => std::future::pending::<()>().await,
            Some(FetchBehavior::Respond { latency }) => tokio::time::sleep(latency).await,
            Some(FetchBehavior::Unavailable { latency }) => {
                tokio::time::sleep(latency).await;
                return Err(CoreError::ProfileUnavailable(
                    "profile store unavailable".to_string(),
                ));
            }
            None => {}
        }

        self.state
            .lock()
            .profiles
            .get(identity)
            .cloned()
            .ok_or_else(|| CoreError::ProfileNotFound(identity.to_string()))
    }
}

#[async_trait]
impl MessageStore for MemoryPlatform {
    async fn create_message(
        &self,
        topic: &TopicId,
        sender: &Identity,
        body: &str,
    ) -> CoreResult<Message> {
        let (message, delay) = {
            let mut state = self.state.lock();
            if state.failing_writes > 0 {
                state.failing_writes -= 1;
                return Err(CoreError::Backend("message insert rejected".to_string()));
            }
            (state.commit_message(topic, sender, body), state.write_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(message)
    }

    async fn list_messages(&self, topic: &TopicId, limit: usize) -> CoreResult<Vec<Message>> {
        let state = self.state.lock();
        let messages = state.messages.get(topic).map(Vec::as_slice).unwrap_or(&[]);
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn mark_read(&self, topic: &TopicId, reader: &Identity) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.mark_read_calls.push((topic.clone(), reader.clone()));
        let now = now_millis();
        if let Some(messages) = state.messages.get_mut(topic) {
            for message in messages.iter_mut().filter(|m| !m.is_from(reader)) {
                message.read_at.get_or_insert(now);
            }
        }
        Ok(())
    }
}

impl RealtimeTransport for MemoryPlatform {
    fn subscribe_topic(&self, topic: &TopicId) -> CoreResult<Subscription<Message>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_subscription_id();
            state
                .topic_listeners
                .entry(topic.clone())
                .or_default()
                .insert(id, tx);
            id
        };

        let state = self.state.clone();
        let topic = topic.clone();
        Ok(Subscription::new(rx, move || {
            let mut state = state.lock();
            if let Some(listeners) = state.topic_listeners.get_mut(&topic) {
                listeners.remove(&id);
                if listeners.is_empty() {
                    state.topic_listeners.remove(&topic);
                }
            }
        }))
    }
}

impl InterruptTransport for MemoryPlatform {
    fn subscribe_interrupts(&self) -> CoreResult<Subscription<InterruptEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_subscription_id();
            state.interrupt_listeners.insert(id, tx);
            id
        };

        let state = self.state.clone();
        Ok(Subscription::new(rx, move || {
            state.lock().interrupt_listeners.remove(&id);
        }))
    }
}

/// Navigator that records which interrupts triggered recovery navigation
#[derive(Clone, Default)]
pub struct RecordingNavigator {
    navigated: Arc<Mutex<Vec<InterruptId>>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn navigations(&self) -> Vec<InterruptId> {
        self.navigated.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.navigated.lock().len()
    }
}

impl RecoveryNavigator for RecordingNavigator {
    fn navigate_to_recovery(&self, event: &InterruptEvent) {
        self.navigated.lock().push(event.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn officer() -> Profile {
        Profile::new(Identity::new("u1"), Role::Officer, "Officer One")
    }

    #[tokio::test]
    async fn test_sign_in_notifies_listeners() {
        let platform = MemoryPlatform::new();
        platform.add_account("one@example.org", "pw", officer());
        let mut changes = platform.on_identity_change();

        let identity = platform
            .sign_in(&Credentials::new("one@example.org", "pw"))
            .await
            .unwrap();

        assert_eq!(identity, Identity::new("u1"));
        assert_eq!(
            changes.recv().await,
            Some(IdentityChange::signed_in(identity.clone()))
        );
        assert_eq!(platform.current_session().await.unwrap(), Some(identity));
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let platform = MemoryPlatform::new();
        platform.add_account("one@example.org", "pw", officer());

        let err = platform
            .sign_in(&Credentials::new("one@example.org", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err, CredentialError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unregisters() {
        let platform = MemoryPlatform::new();
        let sub = platform.on_identity_change();
        assert_eq!(platform.active_identity_listeners(), 1);
        drop(sub);
        assert_eq!(platform.active_identity_listeners(), 0);
        assert_eq!(platform.listener_registrations(), 1);
    }

    #[tokio::test]
    async fn test_list_messages_returns_tail_oldest_first() {
        let platform = MemoryPlatform::new();
        let topic = TopicId::new("t");
        let who = Identity::new("u2");
        for body in ["a", "b", "c"] {
            platform.inject_message(&topic, &who, body);
        }

        let listed = platform.list_messages(&topic, 2).await.unwrap();
        let bodies: Vec<_> = listed.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_topic_subscription_receives_commits() {
        let platform = MemoryPlatform::new();
        let topic = TopicId::new("t");
        let mut sub = platform.subscribe_topic(&topic).unwrap();
        assert_eq!(platform.active_topic_subscriptions(&topic), 1);

        let committed = platform
            .create_message(&topic, &Identity::new("u1"), "hello")
            .await
            .unwrap();
        assert_eq!(sub.recv().await, Some(committed));

        drop(sub);
        assert_eq!(platform.active_topic_subscriptions(&topic), 0);
    }

    #[tokio::test]
    async fn test_failing_write() {
        let platform = MemoryPlatform::new();
        platform.fail_next_writes(1);
        let topic = TopicId::new("t");

        assert!(platform
            .create_message(&topic, &Identity::new("u1"), "x")
            .await
            .is_err());
        assert!(platform
            .create_message(&topic, &Identity::new("u1"), "y")
            .await
            .is_ok());
        assert_eq!(platform.stored_messages(&topic).len(), 1);
    }
}
