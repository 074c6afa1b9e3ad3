//! Cancellable subscription handle
//!
//! Every push stream the core consumes (identity changes, topic inserts,
//! interrupts) arrives through a [`Subscription`]. Dropping the handle
//! unsubscribes, so whoever owns the handle owns the upstream registration.

use tokio::sync::mpsc;

type Release = Box<dyn FnOnce() + Send>;

/// Receiving end of a push subscription.
///
/// # Example
///
/// ```ignore
/// let mut sub = transport.subscribe_topic(&topic)?;
/// while let Some(message) = sub.recv().await {
///     conversation.apply_remote(message);
/// }
/// // `sub` dropped here: upstream registration released
/// ```
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<T>,
    guard: SubscriptionGuard,
}

/// Upstream registration of a subscription; released on drop.
pub struct SubscriptionGuard {
    release: Option<Release>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T> Subscription<T> {
    /// Wrap a receiver together with the action that tears down the upstream registration.
    pub fn new(
        events: mpsc::UnboundedReceiver<T>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            guard: SubscriptionGuard {
                release: Some(Box::new(release)),
            },
        }
    }

    /// Receive the next event.
    ///
    /// Returns None once the sender side is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.events.recv().await
    }

    /// Take an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.events.try_recv().ok()
    }

    /// Separate the receiver from the registration.
    ///
    /// Lets a pump task own the receiver while its owner keeps the guard and
    /// releases the registration synchronously by dropping it.
    pub fn split(self) -> (mpsc::UnboundedReceiver<T>, SubscriptionGuard) {
        (self.events, self.guard)
    }

    /// Explicitly end the subscription.
    pub fn unsubscribe(self) {}
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
