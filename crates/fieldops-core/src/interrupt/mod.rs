//! Interrupt broadcast channel
//!
//! Interrupts are session-wide notifications (emergency alerts, forced
//! recovery) that block normal interaction until the user acknowledges them.
//! At most one is active; later arrivals wait in FIFO order and redelivered
//! ids are dropped.

mod channel;
mod event;
mod queue;

pub use channel::InterruptChannel;
pub use event::{InterruptEvent, InterruptId};
pub use queue::{InterruptQueue, Receipt};
