//! Process-wide interrupt channel

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::event::{InterruptEvent, InterruptId};
use super::queue::{InterruptQueue, Receipt};
use crate::backend::{InterruptTransport, RecoveryNavigator, SubscriptionGuard};
use crate::config::InterruptConfig;
use crate::error::CoreResult;

struct ChannelInner {
    queue: Mutex<InterruptQueue>,
    active_tx: watch::Sender<Option<InterruptEvent>>,
    navigator: Arc<dyn RecoveryNavigator>,
    pump: Mutex<Option<JoinHandle<()>>>,
    guard: Mutex<Option<SubscriptionGuard>>,
}

impl ChannelInner {
    fn receive(&self, event: InterruptEvent) {
        let id = event.id.clone();
        let mut queue = self.queue.lock();
        match queue.receive(event) {
            Receipt::Activated => {
                info!(%id, "Interrupt active");
                self.active_tx.send_replace(queue.active().cloned());
            }
            Receipt::Queued => {
                info!(%id, queued = queue.queued_len(), "Interrupt queued behind active one");
            }
            Receipt::Redelivered => {
                debug!(%id, "Redelivered interrupt dropped");
            }
        }
    }
}

/// Subscribes once to the interrupt broadcast and tracks the single active
/// interrupt that blocks normal interaction.
///
/// # Example
///
/// ```ignore
/// let channel = InterruptChannel::start(transport, navigator, InterruptConfig::default())?;
/// let mut active = channel.subscribe();
///
/// while active.changed().await.is_ok() {
///     if let Some(event) = active.borrow_and_update().clone() {
///         show_blocking_banner(&event);
///     }
/// }
/// ```
pub struct InterruptChannel {
    inner: Arc<ChannelInner>,
}

impl InterruptChannel {
    /// Subscribe to the transport and start applying interrupts.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(
        transport: Arc<dyn InterruptTransport>,
        navigator: Arc<dyn RecoveryNavigator>,
        config: InterruptConfig,
    ) -> CoreResult<Self> {
        let subscription = transport.subscribe_interrupts()?;
        let (events, guard) = subscription.split();
        let (active_tx, _) = watch::channel(None);

        let inner = Arc::new(ChannelInner {
            queue: Mutex::new(InterruptQueue::new(config.remembered_ids)),
            active_tx,
            navigator,
            pump: Mutex::new(None),
            guard: Mutex::new(Some(guard)),
        });

        let pump = tokio::spawn(run_interrupt_pump(Arc::downgrade(&inner), events));
        *inner.pump.lock() = Some(pump);
        info!("Interrupt channel started");

        Ok(Self { inner })
    }

    /// The interrupt currently blocking interaction
    pub fn active(&self) -> Option<InterruptEvent> {
        self.inner.queue.lock().active().cloned()
    }

    pub fn is_blocking(&self) -> bool {
        self.inner.queue.lock().is_blocking()
    }

    /// Interrupts waiting behind the active one, oldest first
    pub fn queued(&self) -> Vec<InterruptEvent> {
        self.inner.queue.lock().queued()
    }

    /// Watch the active slot
    pub fn subscribe(&self) -> watch::Receiver<Option<InterruptEvent>> {
        self.inner.active_tx.subscribe()
    }

    /// Acknowledge the active interrupt.
    ///
    /// Triggers recovery navigation exactly once and promotes the next queued
    /// interrupt. Returns false, doing nothing, if `id` is not active.
    pub fn acknowledge(&self, id: &InterruptId) -> bool {
        let acknowledged = {
            let mut queue = self.inner.queue.lock();
            let done = queue.acknowledge(id);
            if done.is_some() {
                self.inner.active_tx.send_replace(queue.active().cloned());
            }
            done
        };

        match acknowledged {
            Some(event) => {
                info!(%id, "Interrupt acknowledged");
                self.inner.navigator.navigate_to_recovery(&event);
                true
            }
            None => {
                debug!(%id, "Acknowledgement ignored, interrupt not active");
                false
            }
        }
    }

    /// Release the subscription and clear the active slot.
    pub fn shutdown(&self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        if self.inner.guard.lock().take().is_some() {
            info!("Interrupt channel stopped");
        }
        self.inner.queue.lock().clear();
        self.inner.active_tx.send_replace(None);
    }
}

impl Drop for InterruptChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_interrupt_pump(
    inner: Weak<ChannelInner>,
    mut events: mpsc::UnboundedReceiver<InterruptEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.receive(event);
    }
    warn!("Interrupt stream closed");
}
