//! Session lifecycle manager
//!
//! Orchestrates the identity provider and the profile store into one
//! observable [`SessionState`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SessionManager (cheap clone, Arc<SessionInner>)                │
//! │  ├── state_tx: watch::Sender<SessionState>                      │
//! │  │   └── latest state for readers                               │
//! │  ├── transitions_tx: broadcast::Sender<SessionState>            │
//! │  │   └── every published state, in order                        │
//! │  ├── generation: Mutex<u64>                                     │
//! │  │   └── bumped on every reset; loads write only if current     │
//! │  ├── listener: JoinHandle (identity changes, registered once)   │
//! │  └── loader: JoinHandle (profile fetch with timeout + retries)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::{ProfileFailure, SessionState};
use crate::backend::{AuthEvent, IdentityChange, IdentityProvider, ProfileStore, Subscription};
use crate::config::SessionConfig;
use crate::error::{CoreError, CoreResult, CredentialError};
use crate::types::{Credentials, Identity, Profile, Role};

/// Capacity of the transition broadcast channel
const TRANSITION_CHANNEL_CAPACITY: usize = 64;

struct SessionInner {
    identity_provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    config: SessionConfig,
    state_tx: watch::Sender<SessionState>,
    transitions_tx: broadcast::Sender<SessionState>,
    /// Load generation; guards every state write made by a background load
    generation: Mutex<u64>,
    logout_in_flight: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
    loader: Mutex<Option<JoinHandle<()>>>,
}

/// Releases the logout reentrancy flag however the sign-out call ends.
struct LogoutGuard<'a>(&'a AtomicBool);

impl Drop for LogoutGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the process's session state machine.
///
/// Construct once, call [`initialize`](Self::initialize), then hand clones to
/// consumers. Consumers observe through [`subscribe`](Self::subscribe) and
/// mutate only through the operations below.
///
/// # Example
///
/// ```ignore
/// let session = SessionManager::new(platform.clone(), platform.clone(), config.session);
/// session.initialize()?;
///
/// session.login(&Credentials::new("officer@example.org", "secret")).await?;
///
/// let mut state = session.subscribe();
/// state.wait_for(|s| s.is_authenticated() || s.is_failed()).await?;
/// ```
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a manager in the `Unauthenticated` state.
    ///
    /// Nothing is registered with the identity provider until `initialize()`.
    pub fn new(
        identity_provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                identity_provider,
                profiles,
                config,
                state_tx,
                transitions_tx,
                generation: Mutex::new(0),
                logout_in_flight: AtomicBool::new(false),
                listener: Mutex::new(None),
                loader: Mutex::new(None),
            }),
        }
    }

    /// Register the identity-change listener and probe for a stored credential.
    ///
    /// Idempotent: only the first call registers with the provider. Must be
    /// called from within a tokio runtime.
    pub fn initialize(&self) -> CoreResult<()> {
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            debug!("Session manager already initialized");
            return Ok(());
        }

        let changes = self.inner.identity_provider.on_identity_change();
        let inner = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(run_listener(inner, changes)));
        info!("Session manager initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.listener.lock().is_some()
    }

    /// Exchange credentials with the identity provider.
    ///
    /// Local state is cleared before the exchange starts, so a previous
    /// profile is never visible while it runs. A rate-limited exchange is
    /// retried after the back-off up to `max_attempts` times. On success the
    /// returned value is a snapshot; the identity-change listener drives the
    /// rest of the bootstrap.
    pub async fn login(&self, credentials: &Credentials) -> CoreResult<SessionState> {
        if !self.is_initialized() {
            return Err(CoreError::InvalidOperation(
                "login called before initialize()".to_string(),
            ));
        }

        let generation = self.inner.reset(SessionState::Unauthenticated);
        info!(email = %credentials.email, "Signing in");

        let max_attempts = self.inner.config.max_attempts;
        let mut attempt: u32 = 1;
        let identity = loop {
            match self.inner.identity_provider.sign_in(credentials).await {
                Ok(identity) => break identity,
                Err(CredentialError::RateLimited) if attempt < max_attempts => {
                    warn!(
                        email = %credentials.email,
                        attempt,
                        "Sign-in rate limited, backing off"
                    );
                    tokio::time::sleep(self.inner.config.retry_backoff()).await;
                    if !self.inner.is_current(generation) {
                        return Err(CoreError::InvalidOperation(
                            "session changed while sign-in was backing off".to_string(),
                        ));
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!(email = %credentials.email, attempt, error = %e, "Sign-in rejected");
                    return Err(e.into());
                }
            }
        };

        debug!(%identity, attempt, "Credential exchange succeeded");
        // The listener may already have moved past this point.
        self.inner
            .publish_if(generation, SessionState::Authenticating, |s| {
                *s == SessionState::Unauthenticated
            });
        Ok(self.state())
    }

    /// Sign out.
    ///
    /// Local state clears immediately; the remote sign-out is best-effort.
    /// While one logout is in flight, further calls return without doing anything.
    pub async fn logout(&self) {
        if self.inner.logout_in_flight.swap(true, Ordering::AcqRel) {
            debug!("Logout already in flight");
            return;
        }
        let _guard = LogoutGuard(&self.inner.logout_in_flight);

        self.inner.reset(SessionState::Unauthenticated);
        info!("Local session cleared");

        if let Err(e) = self.inner.identity_provider.sign_out().await {
            warn!(error = %e, "Remote sign-out failed");
        }
    }

    /// Start a fresh loading cycle after `ProfileFailed`.
    pub fn retry_profile_fetch(&self) -> CoreResult<()> {
        let identity = match &*self.inner.state_tx.borrow() {
            SessionState::ProfileFailed { identity, .. } => identity.clone(),
            other => {
                return Err(CoreError::InvalidOperation(format!(
                    "profile retry needs ProfileFailed, session is {}",
                    other
                )))
            }
        };

        let expected = identity.clone();
        let started = self.inner.begin_loading(identity, false, move |state| {
            matches!(state, SessionState::ProfileFailed { identity, .. } if *identity == expected)
        });
        if started {
            Ok(())
        } else {
            Err(CoreError::InvalidOperation(
                "session changed before the retry started".to_string(),
            ))
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch the latest state
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive every published state in order
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<SessionState> {
        self.inner.transitions_tx.subscribe()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.inner.state_tx.borrow().identity().cloned()
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.inner.state_tx.borrow().profile().cloned()
    }

    /// Profile of the signed-in user.
    ///
    /// After a failed load the error says why the profile is missing;
    /// otherwise it is `NotAuthenticated`.
    pub fn require_profile(&self) -> CoreResult<Profile> {
        match &*self.inner.state_tx.borrow() {
            SessionState::Authenticated { profile, .. } => Ok(profile.clone()),
            SessionState::ProfileFailed { identity, reason } => Err(match reason {
                ProfileFailure::TimedOut { attempts } => CoreError::ProfileFetchTimeout {
                    attempts: *attempts,
                },
                ProfileFailure::NotFound => CoreError::ProfileNotFound(identity.to_string()),
                ProfileFailure::Unavailable(msg) => CoreError::ProfileUnavailable(msg.clone()),
            }),
            _ => Err(CoreError::NotAuthenticated),
        }
    }

    /// Profile of the signed-in user if its role is one of `allowed`
    pub fn require_role(&self, allowed: &[Role]) -> CoreResult<Profile> {
        let profile = self.require_profile()?;
        if profile.has_role(allowed) {
            Ok(profile)
        } else {
            Err(CoreError::Forbidden { role: profile.role })
        }
    }

    /// Stop the listener and any in-flight profile load.
    ///
    /// The manager stays initialized, so the listener is never registered again.
    pub fn shutdown(&self) {
        info!("Shutting down session manager");
        if let Some(listener) = self.inner.listener.lock().as_ref() {
            listener.abort();
        }
        if let Some(loader) = self.inner.loader.lock().take() {
            loader.abort();
        }
    }
}

impl SessionInner {
    fn publish(&self, state: SessionState) {
        debug!(%state, "Session transition");
        let _ = self.transitions_tx.send(state.clone());
        self.state_tx.send_replace(state);
    }

    /// Invalidate any running load and publish `next`. Returns the new generation.
    fn reset(&self, next: SessionState) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        if let Some(loader) = self.loader.lock().take() {
            loader.abort();
        }
        self.publish(next);
        *generation
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.lock() == generation
    }

    /// Publish `next` if no reset happened since `generation` and `condition` holds.
    fn publish_if(
        &self,
        generation: u64,
        next: SessionState,
        condition: impl FnOnce(&SessionState) -> bool,
    ) -> bool {
        let current = self.generation.lock();
        if *current != generation {
            debug!(stale = generation, current = *current, "Discarding stale session write");
            return false;
        }
        if !condition(&*self.state_tx.borrow()) {
            return false;
        }
        self.publish(next);
        true
    }

    fn publish_if_current(&self, generation: u64, next: SessionState) -> bool {
        self.publish_if(generation, next, |_| true)
    }

    /// Start a new loading cycle for `identity` if `condition` holds.
    ///
    /// The condition check, generation bump and first `ProfileLoading` publish
    /// happen under one lock.
    fn begin_loading(
        self: &Arc<Self>,
        identity: Identity,
        via_authenticating: bool,
        condition: impl FnOnce(&SessionState) -> bool,
    ) -> bool {
        let mut generation = self.generation.lock();
        if !condition(&*self.state_tx.borrow()) {
            return false;
        }
        *generation += 1;

        if via_authenticating && *self.state_tx.borrow() != SessionState::Authenticating {
            self.publish(SessionState::Authenticating);
        }
        self.publish(SessionState::ProfileLoading {
            identity: identity.clone(),
            attempt: 1,
        });

        let mut loader = self.loader.lock();
        if let Some(previous) = loader.take() {
            previous.abort();
        }
        *loader = Some(tokio::spawn(run_profile_load(
            self.clone(),
            identity,
            *generation,
        )));
        true
    }

    fn handle_identity(self: &Arc<Self>, identity: Identity) {
        let expected = identity.clone();
        let started = self.begin_loading(identity, true, move |state| {
            state.identity() != Some(&expected)
        });
        if !started {
            debug!("Identity unchanged, ignoring notification");
        }
    }

    fn handle_signed_out(&self) {
        if *self.state_tx.borrow() == SessionState::Unauthenticated {
            return;
        }
        info!("Identity provider reports no session");
        self.reset(SessionState::Unauthenticated);
    }

    fn apply_identity_change(self: &Arc<Self>, change: IdentityChange) {
        debug!(event = ?change.event, identity = ?change.identity, "Identity change");
        match (change.event, change.identity) {
            (AuthEvent::SignedIn | AuthEvent::TokenRefreshed, Some(identity)) => {
                self.handle_identity(identity)
            }
            (AuthEvent::SignedOut, _) | (_, None) => self.handle_signed_out(),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
        if let Some(loader) = self.loader.get_mut().take() {
            loader.abort();
        }
    }
}

/// Identity-change listener task.
///
/// Probes for a stored credential first, then applies notifications in
/// delivery order. Holds only a weak reference so dropping the last manager
/// ends it.
async fn run_listener(inner: Weak<SessionInner>, mut changes: Subscription<IdentityChange>) {
    let (provider, generation) = match inner.upgrade() {
        Some(this) => {
            let generation = *this.generation.lock();
            (this.identity_provider.clone(), generation)
        }
        None => return,
    };

    // A login or notification handled during the probe supersedes its answer.
    let probe = provider.current_session().await;
    if let Some(this) = inner.upgrade() {
        match probe {
            _ if !this.is_current(generation) => {
                debug!("Session changed during startup probe, ignoring result");
            }
            Ok(Some(identity)) => {
                info!(%identity, "Found stored credential");
                this.handle_identity(identity);
            }
            Ok(None) => this.handle_signed_out(),
            Err(e) => {
                warn!(error = %e, "Session probe failed, treating as signed out");
                this.handle_signed_out();
            }
        }
    }

    while let Some(change) = changes.recv().await {
        let Some(this) = inner.upgrade() else {
            break;
        };
        this.apply_identity_change(change);
    }

    debug!("Identity change stream ended");
}

/// Profile loading task for one generation.
///
/// Each attempt races the fetch against its timeout; a timed-out fetch is
/// dropped, so its result can never land. Transient failures retry after the
/// back-off until the attempt cap, structural ones fail immediately.
async fn run_profile_load(inner: Arc<SessionInner>, identity: Identity, generation: u64) {
    let max_attempts = inner.config.max_attempts;
    let mut attempt: u32 = 1;

    loop {
        let timeout = inner.config.fetch_timeout(attempt);
        debug!(%identity, attempt, timeout_ms = timeout.as_millis() as u64, "Fetching profile");

        let failure = match tokio::time::timeout(timeout, inner.profiles.fetch_profile(&identity))
            .await
        {
            Ok(Ok(profile)) => {
                if inner.publish_if_current(
                    generation,
                    SessionState::Authenticated {
                        identity: identity.clone(),
                        profile,
                    },
                ) {
                    info!(%identity, attempt, "Profile loaded");
                }
                return;
            }
            Ok(Err(CoreError::ProfileNotFound(_))) => {
                warn!(%identity, "No profile for identity");
                inner.publish_if_current(
                    generation,
                    SessionState::ProfileFailed {
                        identity,
                        reason: ProfileFailure::NotFound,
                    },
                );
                return;
            }
            Ok(Err(e)) if !e.is_transient() => {
                warn!(%identity, error = %e, "Profile fetch failed");
                inner.publish_if_current(
                    generation,
                    SessionState::ProfileFailed {
                        identity,
                        reason: ProfileFailure::Unavailable(e.to_string()),
                    },
                );
                return;
            }
            Ok(Err(e)) => {
                warn!(%identity, attempt, error = %e, "Profile fetch failed");
                ProfileFailure::Unavailable(e.to_string())
            }
            Err(_) => {
                warn!(%identity, attempt, "Profile fetch timed out");
                ProfileFailure::TimedOut { attempts: attempt }
            }
        };

        if attempt >= max_attempts {
            warn!(%identity, attempts = attempt, reason = %failure, "Giving up on profile");
            inner.publish_if_current(
                generation,
                SessionState::ProfileFailed {
                    identity,
                    reason: failure,
                },
            );
            return;
        }

        attempt += 1;
        if !inner.publish_if_current(
            generation,
            SessionState::ProfileLoading {
                identity: identity.clone(),
                attempt,
            },
        ) {
            return;
        }

        tokio::time::sleep(inner.config.retry_backoff()).await;
        if !inner.is_current(generation) {
            return;
        }
    }
}
